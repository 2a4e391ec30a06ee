pub mod backup;
pub mod config;
pub mod console;
pub mod deferred;
pub mod dispatcher;
pub mod events;
pub mod protocol;  // 원격 콘솔 프레임 코덱
pub mod store;
pub mod supervisor;
pub mod update;
pub mod utils;
