//! Публикующая сторона: генератор id публикаций и публикатор событий.

pub mod publisher;
pub mod sequencer;

pub use publisher::{Publisher, PublisherStats};
pub use sequencer::{PublicationSequencer, MAX_PUB_ID, MIN_PUB_ID};
