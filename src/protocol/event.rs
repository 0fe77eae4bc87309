use std::fmt;

use bytes::Bytes;
use pubcast_error::DecodeError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Поле с именем события; его значение служит топиком.
pub const NAME_FIELD: &str = "name";
/// Поле, куда публикатор записывает id публикации.
pub const ID_FIELD: &str = "id";
/// Флаг того, что у события есть bulk-компаньон.
pub const BULK_FIELD: &str = "bulk";

/// Событие: набор именованных полей, сериализуемый в JSON-объект.
///
/// Перед публикацией обязано содержать строковое поле `name`.
/// Поля `id` и `bulk` проставляет [`Publisher`](crate::Publisher).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(Map<String, Value>);

/// Сырые байты, опубликованные вместе с событием.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkPayload {
    /// Id публикации, связывающий bulk с его событием.
    pub pub_id: u32,
    /// Байты ровно в том виде, в каком их передал публикатор.
    pub data: Bytes,
}

/// Декодированное тело фрейма, которое получает callback.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Event(Event),
    Bulk(BulkPayload),
}

/// Декодированный фрейм: топик и полезная нагрузка.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: Payload,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Event {
    /// Создаёт событие с заданным именем.
    pub fn new(name: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(NAME_FIELD.to_string(), Value::String(name.into()));
        Self(fields)
    }

    /// Пустое событие без полей.
    pub fn empty() -> Self {
        Self(Map::new())
    }

    /// Builder-вариант [`Event::insert`].
    pub fn with_field(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.insert(key, value);
        self
    }

    /// Записывает поле, возвращая предыдущее значение.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn remove(
        &mut self,
        key: &str,
    ) -> Option<Value> {
        self.0.remove(key)
    }

    /// Имя события, если поле `name` есть и это строка.
    pub fn name(&self) -> Option<&str> {
        self.get(NAME_FIELD).and_then(Value::as_str)
    }

    /// Id публикации, если он уже проставлен.
    pub fn id(&self) -> Option<u64> {
        self.get(ID_FIELD).and_then(Value::as_u64)
    }

    /// Есть ли у события bulk-компаньон.
    pub fn is_bulk(&self) -> bool {
        self.get(BULK_FIELD).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    /// Сериализует событие в JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, DecodeError> {
        serde_json::to_vec(&self.0).map_err(|e| DecodeError::Encode {
            reason: e.to_string(),
        })
    }

    /// Разбирает JSON-объект в событие.
    ///
    /// Любое другое JSON-значение (массив, число, строка) считается ошибкой.
    pub fn from_json(body: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(body).map_err(|e| DecodeError::Malformed {
            reason: e.to_string(),
        })?;
        Self::try_from(value)
    }
}

impl Payload {
    pub fn as_event(&self) -> Option<&Event> {
        match self {
            Self::Event(event) => Some(event),
            Self::Bulk(_) => None,
        }
    }

    pub fn as_bulk(&self) -> Option<&BulkPayload> {
        match self {
            Self::Bulk(bulk) => Some(bulk),
            Self::Event(_) => None,
        }
    }
}

impl Message {
    pub fn new(
        topic: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    pub fn is_bulk(&self) -> bool {
        matches!(self.payload, Payload::Bulk(_))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl TryFrom<Value> for Event {
    type Error = DecodeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(DecodeError::NotAnObject {
                kind: json_kind(&other).to_string(),
            }),
        }
    }
}

impl From<Map<String, Value>> for Event {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl fmt::Display for Event {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
