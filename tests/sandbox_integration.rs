//! Integration tests for the Docker sandbox layer.
//!
//! These tests need a running Docker daemon and pull the controller and
//! node images on first use. Run with:
//! cargo test --test sandbox_integration -- --ignored

use std::sync::Arc;

use ansibox::config::SandboxConfig;
use ansibox::grader::{TestCase, TestRunner};
use ansibox::sandbox::{
    DockerClient, PlaybookExecutor, TopologyManager, TIMEOUT_EXIT_CODE,
};

const HELLO_PLAYBOOK: &str = r#"
- hosts: all
  tasks:
    - name: Say hello
      debug:
        msg: "hi from the sandbox"
"#;

const SLOW_PLAYBOOK: &str = r#"
- hosts: all
  tasks:
    - name: Sleep well past the limit
      pause:
        seconds: 60
"#;

fn test_config() -> SandboxConfig {
    SandboxConfig::default()
}

fn manager() -> (Arc<DockerClient>, TopologyManager, PlaybookExecutor) {
    let docker = Arc::new(DockerClient::new().expect("Docker daemon must be running"));
    let topology = TopologyManager::new(Arc::clone(&docker), test_config());
    let executor = PlaybookExecutor::new(Arc::clone(&docker));
    (docker, topology, executor)
}

fn unique_tag() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[tokio::test]
#[ignore]
async fn test_provision_execute_and_destroy() {
    let (_docker, topology, executor) = manager();
    let tag = unique_tag();

    let provisioned = topology.create("it-user", &tag).await.expect("provision");
    assert!(provisioned.topology_name.starts_with("ansibox_it-user_"));

    let result = executor
        .execute(&provisioned.topology_name, HELLO_PLAYBOOK, 120)
        .await;
    assert!(result.success, "stderr: {}", result.stderr);
    assert_eq!(result.exit_code, 0);
    assert!(result.stdout.contains("hi from the sandbox"));
    assert!(result.execution_time > 0.0);

    let cases = vec![
        TestCase::OutputContains {
            name: None,
            expected: "hi from the sandbox".to_string(),
        },
        TestCase::NoErrors { name: None },
    ];
    let report = TestRunner::run_tests(&cases, &result);
    assert!(report.passed);
    assert_eq!(report.passed_tests, 2);

    assert!(topology.destroy(&provisioned.topology_name).await);
    // Destroying again is an idempotent success.
    assert!(topology.destroy(&provisioned.topology_name).await);
}

#[tokio::test]
#[ignore]
async fn test_execution_deadline_kills_run() {
    let (_docker, topology, executor) = manager();
    let tag = unique_tag();

    let provisioned = topology
        .create("it-timeout", &tag)
        .await
        .expect("provision");

    let result = executor
        .execute(&provisioned.topology_name, SLOW_PLAYBOOK, 2)
        .await;
    assert!(!result.success);
    assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
    assert!(result.execution_time >= 2.0);
    assert!(result.error.expect("timeout error").contains("timed out"));

    topology.destroy(&provisioned.topology_name).await;
}

#[tokio::test]
#[ignore]
async fn test_execute_against_missing_topology() {
    let (_docker, _topology, executor) = manager();

    let result = executor
        .execute("ansibox_nobody_00000000", HELLO_PLAYBOOK, 30)
        .await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Container not found"));
}
