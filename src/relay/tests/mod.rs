use super::*;
use crate::delivery::DeliveryResult;
use crate::error::DownloadError;
use crate::quota::MemoryQuotaStore;
use crate::relay::test_helpers::*;
use crate::torrent::fixtures;
use std::time::Duration;

mod lifecycle;

fn user(id: &str) -> UserId {
    UserId::from(id)
}

/// Wait until `check` holds, polling every few milliseconds
async fn wait_until(check: impl Fn() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
