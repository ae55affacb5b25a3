//! Background task lifecycle.

use std::time::Duration;

mod common;
use common::test_harness;

#[tokio::test]
async fn test_background_tasks_stop_on_shutdown() {
    let h = test_harness().await;
    h.ctx.spawn_background();

    let names: Vec<String> = h
        .ctx
        .supervisor
        .records()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, ["discovery", "heartbeat", "jwt-flush"]);

    assert!(h.ctx.supervisor.shutdown(Duration::from_secs(5)).await);
    assert!(h.ctx.supervisor.records().iter().all(|r| r.running == 0));
}

#[tokio::test]
async fn test_stop_all_stops_automation_servers() {
    let h = test_harness().await;
    let port = h.ctx.processes.start("X", "t1").await.unwrap();
    assert_eq!(port, h.backend_port);

    h.ctx.processes.stop_all().await;
    assert_eq!(h.ctx.processes.running_port("X").await, None);
    assert_eq!(h.ctx.leases.lookup("X").await.unwrap(), Some(port));
}
