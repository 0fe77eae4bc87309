//! Протокол: модель события и кодек транспортных фреймов.
//!
//! - `event`: событие, bulk-нагрузка и декодированное сообщение.
//! - `frame`: кодирование/декодирование фреймов `<topic> <body>`.

pub mod event;
pub mod frame;

pub use event::*;
pub use frame::{bulk_topic, decode, encode_bulk, encode_normal, is_bulk_topic};
