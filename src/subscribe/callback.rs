use std::sync::Arc;

use pubcast_error::BoxError;

use crate::protocol::Message;

/// Результат вызова callback-а. Ошибка логируется и дальше не уходит.
pub type CallbackResult = Result<(), BoxError>;

/// Обработчик входящих сообщений.
///
/// Реализован для любого `Fn(&Message) -> CallbackResult`, поэтому обычно
/// достаточно замыкания, обёрнутого в [`callback`].
pub trait Callback: Send + Sync {
    fn on_message(
        &self,
        message: &Message,
    ) -> CallbackResult;
}

/// Владеющая ссылка на callback.
///
/// Реестр хранит только слабые ссылки: callback живёт, пока жив хотя бы
/// один `SharedCallback` у вызывающей стороны.
pub type SharedCallback = Arc<dyn Callback>;

impl<F> Callback for F
where
    F: Fn(&Message) -> CallbackResult + Send + Sync,
{
    fn on_message(
        &self,
        message: &Message,
    ) -> CallbackResult {
        self(message)
    }
}

/// Оборачивает замыкание в [`SharedCallback`].
///
/// Помогает выводу типов: сигнатура замыкания фиксируется здесь, а не в
/// месте вызова.
pub fn callback<F>(f: F) -> SharedCallback
where
    F: Fn(&Message) -> CallbackResult + Send + Sync + 'static,
{
    Arc::new(f)
}
