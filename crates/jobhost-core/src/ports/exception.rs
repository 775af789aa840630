//! BackgroundExceptionDispatcher port - バックグラウンド処理のエラー通知
//!
//! polling loop や lease 更新タスクで起きたエラーはここに渡して、ループ自体は続行する。

use crate::error::HostError;

/// Fire-and-forget sink for errors raised off the caller's path.
///
/// Implementations must not panic and must not block for long.
pub trait BackgroundExceptionDispatcher: Send + Sync {
    fn report(&self, error: &HostError);
}
