use std::{
    any::Any,
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Weak},
};

use parking_lot::RwLock;
use pubcast_error::{CallbackError, ErrorExt, RegistrationError};
use tracing::{error, trace};

use super::{Callback, SharedCallback};
use crate::protocol::Message;

type WeakCallback = Weak<dyn Callback>;

/// Реестр callback-ов подписчика.
///
/// Хранит слабые ссылки в двух коллекциях: callback-и на все топики и
/// callback-и конкретных топиков. Мёртвые ссылки удаляются при первой
/// диспетчеризации, которая на них наткнулась.
///
/// Callback-и вызываются без удержания блокировки, так что callback может
/// сам регистрировать новые обработчики.
#[derive(Default)]
pub struct CallbackRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    /// Callback-и на все топики, в порядке регистрации
    all: Vec<WeakCallback>,
    /// Топик → callback-и, в порядке регистрации
    topics: HashMap<String, Vec<WeakCallback>>,
}

/// Итог диспетчеризации одного сообщения.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Сколько callback-ов было вызвано
    pub invoked: usize,
    /// Сколько из них вернули ошибку или запаниковали
    pub failed: usize,
    /// Сколько мёртвых ссылок удалено
    pub pruned: usize,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Регистрирует callback на топик или, если `topic` равен `None`, на
    /// все топики.
    ///
    /// Возвращает нормализованный топик. Реестр не продлевает жизнь
    /// callback-а.
    pub fn register(
        &self,
        callback: &SharedCallback,
        topic: Option<&str>,
    ) -> Result<Option<String>, RegistrationError> {
        let topic = topic.map(normalize_topic).transpose()?;
        let weak = Arc::downgrade(callback);

        let mut inner = self.inner.write();
        match &topic {
            None => inner.all.push(weak),
            Some(topic) => inner.topics.entry(topic.clone()).or_default().push(weak),
        }

        Ok(topic)
    }

    /// Есть ли хоть одна регистрация. Если нет, сообщение можно даже не
    /// декодировать.
    pub fn has_callbacks(&self) -> bool {
        let inner = self.inner.read();
        !inner.all.is_empty() || !inner.topics.is_empty()
    }

    /// Вызывает живые callback-и для сообщения: сначала callback-и на все
    /// топики, затем callback-и топика `message.topic`.
    ///
    /// Ошибки и паники callback-ов логируются и не мешают остальным.
    pub fn dispatch(
        &self,
        message: &Message,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        let (all, specific) = {
            let inner = self.inner.read();
            if inner.all.is_empty() && inner.topics.is_empty() {
                return report;
            }
            (inner.all.clone(), inner.topics.get(&message.topic).cloned())
        };

        let dead_all = invoke_list(&all, message, &mut report);
        let dead_specific = specific
            .as_deref()
            .map(|list| invoke_list(list, message, &mut report))
            .unwrap_or_default();

        if !dead_all.is_empty() || !dead_specific.is_empty() {
            report.pruned = self.prune(&message.topic, &dead_all, &dead_specific);
            trace!(topic = %message.topic, pruned = report.pruned, "dead callbacks pruned");
        }

        report
    }

    /// Количество регистраций на все топики (включая ещё не удалённые
    /// мёртвые).
    pub fn len_all(&self) -> usize {
        self.inner.read().all.len()
    }

    /// Количество регистраций на топик.
    pub fn len_topic(
        &self,
        topic: &str,
    ) -> usize {
        self.inner
            .read()
            .topics
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Топики, для которых есть регистрации.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.inner.read().topics.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn is_empty(&self) -> bool {
        !self.has_callbacks()
    }

    fn prune(
        &self,
        topic: &str,
        dead_all: &[WeakCallback],
        dead_specific: &[WeakCallback],
    ) -> usize {
        let mut inner = self.inner.write();
        let mut pruned = remove_dead(&mut inner.all, dead_all);

        if let Some(list) = inner.topics.get_mut(topic) {
            pruned += remove_dead(list, dead_specific);
            if list.is_empty() {
                inner.topics.remove(topic);
            }
        }

        pruned
    }
}

/// Проверяет топик регистрации: обрезает пробелы по краям, пустой топик и
/// топик с пробелами внутри отвергаются.
pub fn normalize_topic(topic: &str) -> Result<String, RegistrationError> {
    let trimmed = topic.trim();

    let invalid = |reason: &str| RegistrationError::InvalidTopic {
        topic: topic.to_string(),
        reason: reason.to_string(),
    };

    if trimmed.is_empty() {
        return Err(invalid("topic must not be empty"));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(invalid("topic must not contain whitespace"));
    }

    Ok(trimmed.to_string())
}

/// Вызывает каждый живой callback списка. Возвращает мёртвые ссылки.
fn invoke_list(
    list: &[WeakCallback],
    message: &Message,
    report: &mut DispatchReport,
) -> Vec<WeakCallback> {
    let mut dead = Vec::new();

    for weak in list {
        let Some(callback) = weak.upgrade() else {
            dead.push(weak.clone());
            continue;
        };

        report.invoked += 1;
        if let Err(e) = invoke(callback.as_ref(), message) {
            report.failed += 1;
            error!(
                topic = %e.topic(),
                code = %e.status_code(),
                error = %e,
                "callback failed"
            );
        }
    }

    dead
}

fn invoke(
    callback: &dyn Callback,
    message: &Message,
) -> Result<(), CallbackError> {
    match catch_unwind(AssertUnwindSafe(|| callback.on_message(message))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(CallbackError::Failed {
            topic: message.topic.clone(),
            source,
        }),
        Err(panic) => Err(CallbackError::Panicked {
            topic: message.topic.clone(),
            message: panic_message(panic.as_ref()),
        }),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn remove_dead(
    list: &mut Vec<WeakCallback>,
    dead: &[WeakCallback],
) -> usize {
    let before = list.len();
    list.retain(|weak| !dead.iter().any(|d| Weak::ptr_eq(d, weak)));
    before - list.len()
}
