mod common;

use chrono::{TimeZone, Utc};
use claude_usage_monitor::models::block::*;
use claude_usage_monitor::models::*;
use claude_usage_monitor::services::config_store::ConfigStore;
use claude_usage_monitor::services::snapshot::SnapshotComputer;
use common::{base_with_logs, FakeLoader};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

fn ms(h: u32, m: u32) -> i64 {
    Utc.with_ymd_and_hms(2025, 6, 1, h, m, 0).unwrap().timestamp_millis()
}

fn build_computer(
    temp_dir: &TempDir,
    loader: FakeLoader,
) -> (SnapshotComputer<FakeLoader>, Arc<FakeLoader>) {
    let loader = Arc::new(loader);
    let store = ConfigStore::new(temp_dir.path().join("config").join("usage-monitor.json"));
    (SnapshotComputer::new(Arc::clone(&loader), store), loader)
}

#[tokio::test]
async fn test_no_base_directory_is_missing() {
    let temp_dir = TempDir::new().unwrap();
    let loader = FakeLoader::new(vec![temp_dir.path().join("absent")], json!([]));
    let (computer, loader) = build_computer(&temp_dir, loader);

    let snapshot = computer.compute().await;
    assert_eq!(snapshot.status, UsageStatus::Missing);
    assert_eq!(snapshot.total_tokens, 0);
    assert_eq!(snapshot.reset_at_ms, None);
    assert_eq!(snapshot.oldest_timestamp_ms, None);
    assert_eq!(snapshot.limit, DEFAULT_PRO_LIMIT);
    assert_eq!(loader.calls(), 0);
}

#[tokio::test]
async fn test_base_without_projects_is_unavailable() {
    let temp_dir = TempDir::new().unwrap();
    let base = temp_dir.path().join("claude");
    std::fs::create_dir_all(&base).unwrap();
    let loader = FakeLoader::new(vec![base], json!([]));
    let (computer, loader) = build_computer(&temp_dir, loader);

    let snapshot = computer.compute().await;
    assert_eq!(snapshot.status, UsageStatus::Unavailable);
    assert_eq!(snapshot.total_tokens, 0);
    assert_eq!(snapshot.reset_at_ms, None);
    assert_eq!(loader.calls(), 0);
}

#[tokio::test]
async fn test_active_block_flat_counts() {
    let temp_dir = TempDir::new().unwrap();
    let base = base_with_logs(temp_dir.path(), "claude");
    let blocks = json!([{
        "isActive": true,
        "isGap": false,
        "startTime": "2025-06-01T10:00:00Z",
        "endTime": "2025-06-01T15:00:00Z",
        "inputTokens": 100,
        "outputTokens": 50,
        "cacheCreationTokens": 0,
        "cacheReadTokens": 0
    }]);
    let (computer, _) = build_computer(&temp_dir, FakeLoader::new(vec![base], blocks));

    let snapshot = computer.compute().await;
    assert_eq!(snapshot.status, UsageStatus::Ok);
    assert_eq!(snapshot.total_tokens, 150);
    assert_eq!(snapshot.oldest_timestamp_ms, Some(ms(10, 0)));
    assert_eq!(snapshot.reset_at_ms, Some(ms(15, 0)));
    assert_eq!(snapshot.window_ms, WINDOW_MS);
}

#[tokio::test]
async fn test_empty_block_list_is_ok_idle() {
    let temp_dir = TempDir::new().unwrap();
    let base = base_with_logs(temp_dir.path(), "claude");
    let (computer, loader) = build_computer(&temp_dir, FakeLoader::new(vec![base], json!([])));

    let snapshot = computer.compute().await;
    assert_eq!(snapshot.status, UsageStatus::Ok);
    assert_eq!(snapshot.total_tokens, 0);
    assert_eq!(snapshot.oldest_timestamp_ms, None);
    assert_eq!(snapshot.reset_at_ms, None);
    assert_eq!(loader.calls(), 1);
}

#[tokio::test]
async fn test_loader_error_is_unavailable() {
    let temp_dir = TempDir::new().unwrap();
    let base = base_with_logs(temp_dir.path(), "claude");
    let (computer, _) = build_computer(&temp_dir, FakeLoader::failing(vec![base], "boom"));

    assert_eq!(computer.compute().await.status, UsageStatus::Unavailable);
}

#[tokio::test]
async fn test_result_shapes() {
    let temp_dir = TempDir::new().unwrap();
    let base = base_with_logs(temp_dir.path(), "claude");
    let loader = FakeLoader::new(vec![base], json!({ "foo": [] }));
    let (computer, loader) = build_computer(&temp_dir, loader);

    assert_eq!(computer.compute().await.status, UsageStatus::Unavailable);

    loader.set_output(json!("blocks"));
    assert_eq!(computer.compute().await.status, UsageStatus::Unavailable);

    loader.set_output(json!({ "blocks": [{ "totalTokens": 42 }] }));
    let snapshot = computer.compute().await;
    assert_eq!(snapshot.status, UsageStatus::Ok);
    assert_eq!(snapshot.total_tokens, 42);

    loader.set_output(json!({ "data": [{ "total_tokens": 7 }] }));
    assert_eq!(computer.compute().await.total_tokens, 7);
}

#[tokio::test]
async fn test_only_existing_base_dirs_with_logs_are_used() {
    let temp_dir = TempDir::new().unwrap();
    let with_logs = base_with_logs(temp_dir.path(), "a");
    let bare = temp_dir.path().join("b");
    std::fs::create_dir_all(&bare).unwrap();
    let loader = FakeLoader::new(
        vec![temp_dir.path().join("absent"), bare, with_logs.clone()],
        json!([]),
    );
    let (computer, _) = build_computer(&temp_dir, loader);

    assert_eq!(computer.log_base_dirs(), vec![with_logs.clone()]);
    assert_eq!(computer.log_dirs(), vec![with_logs.join("projects")]);
}

#[tokio::test]
async fn test_limit_follows_current_config() {
    let temp_dir = TempDir::new().unwrap();
    let base = base_with_logs(temp_dir.path(), "claude");
    let (computer, _) = build_computer(&temp_dir, FakeLoader::new(vec![base], json!([])));

    assert_eq!(computer.compute().await.limit, DEFAULT_PRO_LIMIT);

    computer.config().set_plan("max5").unwrap();
    let snapshot = computer.compute().await;
    assert_eq!(snapshot.plan, PlanType::Max5);
    assert_eq!(snapshot.limit, 5 * DEFAULT_PRO_LIMIT);

    computer.config().set_pro_limit(1000.0).unwrap();
    assert_eq!(computer.compute().await.limit, 5000);
}

#[tokio::test]
async fn test_missing_still_reports_plan_limit() {
    let temp_dir = TempDir::new().unwrap();
    let loader = FakeLoader::new(vec![], json!([]));
    let (computer, _) = build_computer(&temp_dir, loader);
    computer.config().set_plan("max20").unwrap();

    let snapshot = computer.compute().await;
    assert_eq!(snapshot.status, UsageStatus::Missing);
    assert_eq!(snapshot.limit, 20 * DEFAULT_PRO_LIMIT);
}

fn blocks(values: Vec<Value>) -> Vec<AccountingBlock> {
    values.into_iter().map(AccountingBlock::new).collect()
}

#[test]
fn test_select_prefers_active_non_gap() {
    let list = blocks(vec![
        json!({ "id": "gap", "isActive": true, "isGap": true }),
        json!({ "id": "old", "isActive": false }),
        json!({ "id": "live", "is_active": true }),
    ]);
    let chosen = select_active_block(&list).unwrap();
    assert_eq!(chosen.raw()["id"], "live");
}

#[test]
fn test_select_falls_back_to_first_non_gap_then_last() {
    let list = blocks(vec![
        json!({ "id": "gap", "isGap": true }),
        json!({ "id": "first" }),
        json!({ "id": "second" }),
    ]);
    assert_eq!(select_active_block(&list).unwrap().raw()["id"], "first");

    let list = blocks(vec![
        json!({ "id": "gap1", "isGap": true }),
        json!({ "id": "gap2", "is_gap": true }),
    ]);
    assert_eq!(select_active_block(&list).unwrap().raw()["id"], "gap2");

    assert!(select_active_block(&[]).is_none());
}

#[test]
fn test_total_token_fallback_order() {
    let explicit = AccountingBlock::new(json!({
        "totalTokens": 9,
        "tokenCounts": { "inputTokens": 100 }
    }));
    assert_eq!(explicit.total_tokens(), 9);

    let camel = AccountingBlock::new(json!({
        "tokenCounts": {
            "inputTokens": 1,
            "outputTokens": 2,
            "cacheCreationInputTokens": 3,
            "cacheReadInputTokens": 4
        },
        "inputTokens": 1000
    }));
    assert_eq!(camel.breakdown_total(), Some(10));
    assert_eq!(camel.total_tokens(), 10);

    let snake = AccountingBlock::new(json!({
        "token_counts": {
            "input_tokens": 10,
            "output_tokens": 20,
            "cache_creation_input_tokens": 30,
            "cache_read_input_tokens": 40
        }
    }));
    assert_eq!(snake.total_tokens(), 100);

    let flat_snake = AccountingBlock::new(json!({
        "input_tokens": 5,
        "output_tokens": 5,
        "cache_read_tokens": 5
    }));
    assert_eq!(flat_snake.breakdown_total(), None);
    assert_eq!(flat_snake.total_tokens(), 15);

    let entries = AccountingBlock::new(json!({
        "entries": [
            { "usage": { "inputTokens": 3, "outputTokens": 4 } },
            { "usage": { "input_tokens": 1, "cache_read_input_tokens": 2 } },
            { "inputTokens": 10 },
            { "note": "no usage" }
        ]
    }));
    assert_eq!(entries.flat_total(), None);
    assert_eq!(entries.total_tokens(), 20);

    assert_eq!(AccountingBlock::new(json!({ "id": "x" })).total_tokens(), 0);
}

#[test]
fn test_negative_or_textual_counts_are_ignored() {
    let block = AccountingBlock::new(json!({
        "totalTokens": -3,
        "inputTokens": "12",
        "outputTokens": 8.9
    }));
    assert_eq!(block.explicit_total(), None);
    assert_eq!(block.total_tokens(), 8);
}

#[test]
fn test_timestamp_fallbacks() {
    let block = AccountingBlock::new(json!({
        "startTime": "not a date",
        "start_time": "2025-06-01T10:00:00Z",
        "end": ms(15, 0),
        "resetTime": null
    }));
    assert_eq!(block.start_ms(), Some(ms(10, 0)));
    assert_eq!(block.end_ms(), Some(ms(15, 0)));
    assert_eq!(block.explicit_reset_ms(), None);
    assert_eq!(block.reset_at_ms(), Some(ms(15, 0)));

    let with_reset = AccountingBlock::new(json!({
        "endTime": "2025-06-01T15:00:00Z",
        "usageLimitResetTime": "2025-06-01T14:00:00+00:00"
    }));
    assert_eq!(with_reset.reset_at_ms(), Some(ms(14, 0)));

    assert_eq!(AccountingBlock::new(json!({})).start_ms(), None);
}

#[test]
fn test_parse_timestamp_forms() {
    assert_eq!(parse_timestamp_ms(&json!("2025-06-01T10:00:00Z")), Some(ms(10, 0)));
    assert_eq!(parse_timestamp_ms(&json!("2025-06-01T12:30:00+02:00")), Some(ms(10, 30)));
    assert_eq!(parse_timestamp_ms(&json!("2025-06-01T10:00:00.000")), Some(ms(10, 0)));
    assert_eq!(parse_timestamp_ms(&json!("2025-06-01 10:00:00")), Some(ms(10, 0)));
    assert_eq!(parse_timestamp_ms(&json!("2025-06-01")), Some(ms(0, 0)));
    assert_eq!(parse_timestamp_ms(&json!(ms(10, 0))), Some(ms(10, 0)));
    assert_eq!(parse_timestamp_ms(&json!(ms(10, 0).to_string())), Some(ms(10, 0)));
    assert_eq!(parse_timestamp_ms(&json!("yesterday")), None);
    assert_eq!(parse_timestamp_ms(&json!("")), None);
    assert_eq!(parse_timestamp_ms(&json!(true)), None);
    assert_eq!(parse_timestamp_ms(&Value::Null), None);
}

#[test]
fn test_blocks_from_loader_output_shapes() {
    assert_eq!(blocks_from_loader_output(json!([{}, {}])).map(|b| b.len()), Some(2));
    assert_eq!(blocks_from_loader_output(json!({ "blocks": [{}] })).map(|b| b.len()), Some(1));
    assert_eq!(blocks_from_loader_output(json!({ "data": [] })).map(|b| b.len()), Some(0));
    assert!(blocks_from_loader_output(json!({ "blocks": {} })).is_none());
    assert!(blocks_from_loader_output(json!(null)).is_none());
    assert!(blocks_from_loader_output(json!(3)).is_none());
}
