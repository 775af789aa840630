//! App - アプリケーション層
//!
//! このモジュールは、listener と ports を組み合わせて host を組み立てます。
//!
//! # 主要コンポーネント
//! - **JobHostBuilder**: 関数の登録と起動時検証
//! - **JobHost / RunningHost**: 関数ごとの listener の起動・停止
//! - **FunctionExecutor**: ユーザー関数の実行（エラー・panic を失敗結果に変換）
//! - **QueueOutput**: 出力キューへの enqueue + listener への通知

pub mod builder;
pub mod host;
pub mod output;
pub mod runtime;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, JobHostBuilder};
pub use self::host::{JobHost, RunningHost};
pub use self::output::QueueOutput;
pub use self::runtime::{
    FnQueueFunction, FunctionError, FunctionExecutor, FunctionRegistry, QueueFunction,
    RegisteredFunction, RegistryError,
};
