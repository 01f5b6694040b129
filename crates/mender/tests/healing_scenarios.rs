//! End-to-end healing scenarios against the in-memory driver.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use mender::prelude::*;
use mender::{AttemptOutcome, PoolConfig, ScriptUpdater, SessionPool};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const URL: &str = "http://localhost/login";

const LOGIN_SPEC: &str = r#"import { test } from "@playwright/test";

test("login", async ({ page }) => {
  await page.goto("http://localhost/login");
  await page.locator("id=old-login-btn").click();
  await expect(page.locator("text=Welcome")).toBeVisible();
});
"#;

fn login_page() -> MockDom {
    MockDom::page(vec![
        DomNode::new("form").attr("id", "login").child(
            DomNode::new("button")
                .attr("data-testid", "login-btn")
                .attr("id", "new-login-btn")
                .text("Log in"),
        ),
        DomNode::new("p").text("Welcome"),
    ])
}

fn original_button() -> ElementInfo {
    ElementInfo::new("button")
        .with_attr("data-testid", "login-btn")
        .with_attr("id", "old-login-btn")
        .with_text("Log in")
}

fn failure(script_id: &str, locator: &str) -> FailureContext {
    FailureContext::new(
        script_id,
        Locator::parse(locator).unwrap(),
        URL,
        FailureKind::ElementNotFound,
    )
}

fn engine(config: HealingConfig, factory: MockDriverFactory) -> HealingOrchestrator {
    HealingOrchestrator::new(config, Arc::new(factory)).unwrap()
}

fn write_script(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

mod scenarios {
    use super::*;

    #[tokio::test]
    async fn test_renamed_id_is_healed_and_script_rewritten() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "login.spec.ts", LOGIN_SPEC);
        let engine = engine(HealingConfig::default(), MockDriverFactory::new(login_page()));

        let request = HealRequest::new(failure("login.spec.ts", "id=old-login-btn"))
            .with_element(original_button())
            .with_script(&script);
        let result = engine.heal(request).await.unwrap();

        assert!(result.success, "{:?}", result.reason);
        assert_eq!(result.healed_locator, Some(Locator::id("new-login-btn")));
        let winner = result.attempts.last().unwrap();
        assert_eq!(winner.tier, 1);
        assert_eq!(winner.match_count, 1);
        assert!(winner.visible);
        assert_eq!(winner.outcome, AttemptOutcome::Accepted);
        assert!(result.confidence.unwrap() > 0.0);

        let rewritten = std::fs::read_to_string(&script).unwrap();
        assert!(rewritten.contains(r#"page.locator("id=new-login-btn")"#));
        assert!(!rewritten.contains("old-login-btn"));
        let backup = result.backup_path.unwrap();
        assert_eq!(std::fs::read_to_string(backup).unwrap(), LOGIN_SPEC);
    }

    #[tokio::test]
    async fn test_removed_element_fails_and_leaves_script_untouched() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "login.spec.ts", LOGIN_SPEC);
        let page = MockDom::page(vec![DomNode::new("p").text("Welcome back")]);
        let engine = engine(HealingConfig::default(), MockDriverFactory::new(page));

        let request = HealRequest::new(failure("login.spec.ts", "id=old-login-btn"))
            .with_element(original_button())
            .with_script(&script);
        let result = engine.heal(request).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.phase, HealingPhase::Failed);
        assert_eq!(result.reason.as_deref(), Some("no alternative validated"));
        assert!(!result.attempts.is_empty());
        assert!(result.attempts.iter().all(|a| a.outcome != AttemptOutcome::Accepted));
        assert_eq!(std::fs::read_to_string(&script).unwrap(), LOGIN_SPEC);
        let backup = result.backup_path.unwrap();
        assert_eq!(std::fs::read_to_string(backup).unwrap(), LOGIN_SPEC);
    }

    #[tokio::test]
    async fn test_shared_name_is_rejected_and_engine_moves_on() {
        let page = MockDom::page(vec![
            DomNode::new("div").attr("name", "panel").text("Billing"),
            DomNode::new("div").attr("name", "panel").text("Shipping"),
        ]);
        let engine = engine(HealingConfig::default(), MockDriverFactory::new(page));
        let original = ElementInfo::new("div")
            .with_attr("id", "billing-panel")
            .with_attr("name", "panel")
            .with_text("Billing");

        let request = HealRequest::new(failure("checkout.spec.ts", "id=billing-panel"))
            .with_element(original);
        let result = engine.heal(request).await.unwrap();

        assert!(result.success, "{:?}", result.reason);
        let first = &result.attempts[0];
        assert_eq!(first.locator, Locator::Name("panel".into()));
        assert_eq!(first.match_count, 2);
        assert_eq!(first.outcome, AttemptOutcome::NotUnique);
        assert_eq!(result.healed_locator, Some(Locator::text("Billing")));
        assert_eq!(result.attempts.last().unwrap().tier, 3);
        assert_eq!(result.attempts_count, 1);
    }

    #[tokio::test]
    async fn test_repeated_acquisition_timeouts_engage_cooldown() {
        let factory: Arc<dyn DriverFactory> = Arc::new(MockDriverFactory::new(login_page()));
        let pool = SessionPool::new(
            factory,
            PoolConfig {
                max_sessions: 1,
                ..PoolConfig::default()
            },
        );
        let config = HealingConfig::default()
            .with_max_attempts(3)
            .with_max_sessions(1)
            .with_session_timeout(Duration::from_millis(30))
            .with_backoff(Duration::from_millis(1), Duration::from_millis(4));
        let engine = HealingOrchestrator::with_pool(config, pool.clone()).unwrap();

        // Hold the only session so every acquisition times out
        let held = pool.acquire(URL, Duration::from_secs(1)).await.unwrap();
        let request = || {
            HealRequest::new(failure("login.spec.ts", "id=old-login-btn"))
                .with_element(original_button())
        };
        let result = engine.heal(request()).await.unwrap();
        assert_eq!(result.phase, HealingPhase::Failed);
        assert!(result.attempts.is_empty());

        let key = mender::LocatorKey::new("login.spec.ts", "id=old-login-btn");
        assert_eq!(engine.cooldown().failures(&key), 3);
        assert!(engine.cooldown().is_cooling_down(&key));

        drop(held);
        let created = pool.stats().created;
        let result = engine.heal(request()).await.unwrap();
        assert_eq!(result.phase, HealingPhase::Failed);
        assert_eq!(result.reason.as_deref(), Some("disabled"));
        assert!(result.attempts.is_empty());
        assert_eq!(pool.stats().created, created);
        assert_eq!(pool.stats().checked_out, 0);

        engine.cooldown().clear(&key);
        assert!(engine.heal(request()).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_recovered_acquisition_counts_as_one_failure() {
        let blank = MockDom::page(vec![DomNode::new("p").text("Welcome")]);
        let factory: Arc<dyn DriverFactory> = Arc::new(MockDriverFactory::new(blank));
        let pool = SessionPool::new(
            factory,
            PoolConfig {
                max_sessions: 1,
                ..PoolConfig::default()
            },
        );
        let config = HealingConfig::default()
            .with_max_attempts(3)
            .with_max_sessions(1)
            .with_session_timeout(Duration::from_millis(100))
            .with_backoff(Duration::from_millis(1), Duration::from_millis(4));
        let engine = HealingOrchestrator::with_pool(config, pool.clone()).unwrap();

        // Two acquisitions time out, the third gets the released session
        let held = pool.acquire(URL, Duration::from_secs(1)).await.unwrap();
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            drop(held);
        });
        let result = engine
            .heal(
                HealRequest::new(failure("login.spec.ts", "id=old-login-btn"))
                    .with_element(original_button()),
            )
            .await
            .unwrap();
        release.await.unwrap();

        assert_eq!(result.reason.as_deref(), Some("no alternative validated"));
        let key = mender::LocatorKey::new("login.spec.ts", "id=old-login-btn");
        assert_eq!(engine.cooldown().failures(&key), 1);
        assert!(!engine.cooldown().is_cooling_down(&key));
        assert_eq!(pool.stats().checked_out, 0);
    }
}

mod concurrency {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_browser_queries_never_exceed_pool_size() {
        let factory = Arc::new(
            MockDriverFactory::new(login_page()).with_latency(Duration::from_millis(5)),
        );
        let config = HealingConfig::default().with_max_sessions(2);
        let engine =
            HealingOrchestrator::new(config, Arc::clone(&factory) as Arc<dyn DriverFactory>).unwrap();

        let requests: Vec<HealRequest> = (0..8)
            .map(|i| {
                HealRequest::new(failure(&format!("spec-{i}.ts"), "id=old-login-btn"))
                    .with_element(original_button())
            })
            .collect();
        let results = engine.heal_all(requests).await;

        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|r| r.as_ref().is_ok_and(|r| r.success)));
        assert!(factory.peak_in_flight() <= 2, "peak {}", factory.peak_in_flight());
        assert!(engine.pool().stats().peak_in_query <= 2);
        assert!(engine.pool().stats().peak_checked_out <= 2);
    }

    #[tokio::test]
    async fn test_same_script_updates_serialize() {
        let dir = TempDir::new().unwrap();
        let content = "click(\"id=old-login-btn\");\nclick(\"id=old-signup\");\n";
        let script = write_script(&dir, "flow.js", content);
        let page = MockDom::page(vec![
            DomNode::new("button").attr("id", "new-login-btn").text("Log in"),
            DomNode::new("button").attr("id", "new-signup").text("Sign up"),
        ]);
        let engine = engine(HealingConfig::default(), MockDriverFactory::new(page));

        let requests = vec![
            HealRequest::new(failure("flow.js", "id=old-login-btn"))
                .with_element(ElementInfo::new("button").with_attr("id", "old-login-btn").with_text("Log in"))
                .with_script(&script),
            HealRequest::new(failure("flow.js", "id=old-signup"))
                .with_element(ElementInfo::new("button").with_attr("id", "old-signup").with_text("Sign up"))
                .with_script(&script),
        ];
        let results = engine.heal_all(requests).await;
        for result in &results {
            let result = result.as_ref().unwrap();
            assert!(result.success, "{:?}", result.reason);
        }
        let rewritten = std::fs::read_to_string(&script).unwrap();
        assert_eq!(rewritten, "click(\"id=new-login-btn\");\nclick(\"id=new-signup\");\n");
    }

    #[tokio::test]
    async fn test_duplicate_request_in_batch_is_rejected() {
        let factory = MockDriverFactory::new(login_page()).with_latency(Duration::from_millis(5));
        let engine = engine(HealingConfig::default(), factory);
        let request = HealRequest::new(failure("login.spec.ts", "id=old-login-btn"))
            .with_element(original_button());
        let results = engine.heal_all(vec![request.clone(), request]).await;
        assert!(results[0].as_ref().unwrap().success);
        assert!(matches!(results[1], Err(HealError::AlreadyActive { .. })));
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_cancel_during_validation() {
        let factory = MockDriverFactory::new(login_page()).with_latency(Duration::from_millis(40));
        let engine = engine(HealingConfig::default(), factory);
        let mut events = engine.subscribe();

        let handle = engine
            .spawn(
                HealRequest::new(failure("login.spec.ts", "id=old-login-btn"))
                    .with_element(original_button()),
            )
            .unwrap();
        loop {
            let event = events.recv().await.unwrap();
            if event.phase == HealingPhase::Validating {
                break;
            }
        }
        assert!(engine.cancel(handle.session_id()));

        let session_id = handle.session_id();
        let result = handle.join().await.unwrap();
        assert_eq!(result.phase, HealingPhase::Cancelled);
        assert!(!result.success);
        assert_eq!(engine.status(session_id).unwrap().phase, HealingPhase::Cancelled);
        // The browser session went back to the pool with the cancelled task
        let stats = engine.pool().stats();
        assert_eq!(stats.checked_out, 0);
        assert_eq!(stats.idle, 1);
    }

    #[tokio::test]
    async fn test_slow_phase_times_out() {
        let factory = MockDriverFactory::new(login_page()).with_latency(Duration::from_millis(200));
        let config = HealingConfig::default().with_healing_timeout(Duration::from_millis(50));
        let engine = engine(config, factory);

        let result = engine
            .heal(
                HealRequest::new(failure("login.spec.ts", "id=old-login-btn"))
                    .with_element(original_button()),
            )
            .await
            .unwrap();
        assert_eq!(result.phase, HealingPhase::Timeout);
        assert!(result.reason.unwrap().starts_with("ANALYZING"));
    }

    #[tokio::test]
    async fn test_restore_undoes_a_heal() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "login.spec.ts", LOGIN_SPEC);
        let engine = engine(HealingConfig::default(), MockDriverFactory::new(login_page()));
        let result = engine
            .heal(
                HealRequest::new(failure("login.spec.ts", "id=old-login-btn"))
                    .with_element(original_button())
                    .with_script(&script),
            )
            .await
            .unwrap();
        assert!(result.success);

        ScriptUpdater::new()
            .restore(&result.backup_path.unwrap(), &script)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&script).unwrap(), LOGIN_SPEC);
    }

    #[tokio::test]
    async fn test_report_collects_run() {
        let engine = engine(HealingConfig::default(), MockDriverFactory::new(login_page()));
        let run = "nightly-42";
        let ok = HealRequest::new(failure("login.spec.ts", "id=old-login-btn").with_run_id(run))
            .with_element(original_button());
        let gone = HealRequest::new(failure("login.spec.ts", "id=vanished").with_run_id(run))
            .with_element(ElementInfo::new("img").with_attr("id", "vanished"));
        engine.heal(ok).await.unwrap();
        engine.heal(gone).await.unwrap();

        let report = engine.report(run).unwrap();
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.healed(), 1);
        let md = report.to_markdown();
        assert!(md.contains("id=new-login-btn"));
        assert!(md.contains("FAILED"));
    }

    #[tokio::test]
    async fn test_fingerprint_reused_across_sessions() {
        let engine = engine(HealingConfig::default(), MockDriverFactory::new(login_page()));
        let context = failure("login.spec.ts", "id=old-login-btn").with_step("step-3", "click login");
        engine
            .heal(HealRequest::new(context.clone()).with_element(original_button()))
            .await
            .unwrap();

        // No element info this time: the stored fingerprint is used
        let result = engine.heal(HealRequest::new(context)).await.unwrap();
        assert!(result.success, "{:?}", result.reason);
        let key = FingerprintKey::new("login.spec.ts", "step-3");
        assert!(engine.fingerprints().get(&key).await.unwrap().is_some());
    }
}
