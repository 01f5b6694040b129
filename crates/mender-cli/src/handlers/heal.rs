//! Heal command handler

use std::sync::Arc;

use mender::{
    DriverFactory, ElementInfo, FailureContext, HealRequest, HealingConfig, HealingOrchestrator,
    HealingResult, MockDom, MockDriverFactory,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use crate::commands::HealArgs;
use crate::error::{CliError, CliResult};
use crate::handlers::{read_json, runtime};
use crate::output::{render_progress, render_result};

/// Execute the heal command; an unhealed session is an error
pub fn execute_heal(config: HealingConfig, args: &HealArgs, quiet: bool) -> CliResult<()> {
    let result = runtime()?.block_on(heal(config, args))?;
    if !quiet || !result.success {
        print!("{}", render_result(&result, args.format)?);
    }
    if result.success {
        Ok(())
    } else {
        Err(CliError::Unhealed {
            phase: result.phase.to_string(),
            reason: result.reason.unwrap_or_default(),
        })
    }
}

/// Run one healing session described by the command arguments
pub async fn heal(config: HealingConfig, args: &HealArgs) -> CliResult<HealingResult> {
    let context: FailureContext = read_json(&args.failure)?;
    let element: Option<ElementInfo> = args
        .element
        .as_deref()
        .map(read_json::<ElementInfo>)
        .transpose()?;

    let factory = driver_factory(args).await?;
    let engine = HealingOrchestrator::new(config, factory)?;

    let mut request = HealRequest::new(context);
    if let Some(element) = element {
        request = request.with_element(element);
    }
    if let Some(ref hint) = args.hint {
        request = request.with_hint(hint.clone());
    }
    if let Some(ref script) = args.script {
        request = request.with_script(script.clone());
    }

    let progress = args.progress.then(|| {
        let mut events = engine.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        eprintln!("{}", render_progress(&event));
                        if event.phase.is_terminal() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        })
    });

    let result = engine.heal(request).await?;
    if let Some(task) = progress {
        if let Err(e) = task.await {
            debug!(error = %e, "progress listener ended abnormally");
        }
    }
    info!(
        success = result.success,
        phase = %result.phase,
        elapsed_ms = result.elapsed_ms,
        "heal finished"
    );
    Ok(result)
}

async fn driver_factory(args: &HealArgs) -> CliResult<Arc<dyn DriverFactory>> {
    if let Some(ref path) = args.dom {
        let json = std::fs::read_to_string(path)?;
        return Ok(Arc::new(MockDriverFactory::new(MockDom::from_json(&json)?)));
    }
    launch_browser(args).await
}

#[cfg(feature = "browser")]
async fn launch_browser(args: &HealArgs) -> CliResult<Arc<dyn DriverFactory>> {
    use mender::ChromiumConfig;

    let mut config = ChromiumConfig::default().with_headless(!args.headed);
    if args.no_sandbox {
        config = config.with_no_sandbox();
    }
    Ok(Arc::new(mender::ChromiumFactory::launch(config).await?))
}

#[cfg(not(feature = "browser"))]
#[allow(clippy::unused_async)]
async fn launch_browser(_args: &HealArgs) -> CliResult<Arc<dyn DriverFactory>> {
    Err(CliError::invalid_argument(
        "live sessions need the `browser` feature; pass --dom <file> to replay a recorded DOM",
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::commands::OutputFormat;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn args(dir: &TempDir) -> HealArgs {
        let failure = write(
            dir.path(),
            "failure.json",
            r#"{
                "script_id": "login.spec.ts",
                "original_locator": "id=old-login-btn",
                "target_url": "http://localhost/login",
                "failure_kind": "element_not_found"
            }"#,
        );
        let element = write(
            dir.path(),
            "element.json",
            r#"{"tag": "button", "attributes": {"id": "old-login-btn"}, "text": "Log in"}"#,
        );
        let dom = write(
            dir.path(),
            "dom.json",
            r#"[{"tag": "button", "attributes": {"id": "new-login-btn"}, "text": "Log in"}]"#,
        );
        HealArgs {
            failure,
            element: Some(element),
            hint: None,
            script: None,
            dom: Some(dom),
            headed: false,
            no_sandbox: false,
            progress: false,
            format: OutputFormat::Text,
        }
    }

    #[tokio::test]
    async fn test_heal_against_recorded_dom() {
        let dir = TempDir::new().unwrap();
        let script = write(dir.path(), "login.spec.ts", "page.locator(\"id=old-login-btn\")\n");
        let mut args = args(&dir);
        args.script = Some(script.clone());

        let result = heal(HealingConfig::default(), &args).await.unwrap();
        assert!(result.success, "{:?}", result.reason);
        assert_eq!(
            std::fs::read_to_string(script).unwrap(),
            "page.locator(\"id=new-login-btn\")\n"
        );
    }

    #[tokio::test]
    async fn test_progress_listener_finishes() {
        let dir = TempDir::new().unwrap();
        let mut args = args(&dir);
        args.progress = true;
        let result = heal(HealingConfig::default(), &args).await.unwrap();
        assert!(result.success);
    }

    #[cfg(not(feature = "browser"))]
    #[tokio::test]
    async fn test_live_session_requires_browser_feature() {
        let dir = TempDir::new().unwrap();
        let mut args = args(&dir);
        args.dom = None;
        let err = heal(HealingConfig::default(), &args).await.unwrap_err();
        assert!(err.to_string().contains("browser"));
    }
}
