//! TracingExceptionDispatcher - バックグラウンドエラーをログに流すだけの実装
//!
//! host のデフォルト。エラー監視サービスに送りたい場合は
//! `BackgroundExceptionDispatcher` を自前で実装して builder に渡す。

use std::error::Error as _;

use crate::error::HostError;
use crate::ports::BackgroundExceptionDispatcher;

pub struct TracingExceptionDispatcher;

impl TracingExceptionDispatcher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TracingExceptionDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundExceptionDispatcher for TracingExceptionDispatcher {
    fn report(&self, error: &HostError) {
        match error.source() {
            Some(source) => tracing::error!(error = %error, source = %source, "background operation failed"),
            None => tracing::error!(error = %error, "background operation failed"),
        }
    }
}
