pub mod config;
pub mod protocol;
pub mod publish;
pub mod subscribe;
pub mod transport;

// Публичный экспорт всех типов ошибок из вложенных модулей, чтобы
// упростить доступ к ним из внешнего кода.
pub use config::*;
pub use protocol::*;
pub use publish::*;
pub use subscribe::*;
pub use transport::*;
