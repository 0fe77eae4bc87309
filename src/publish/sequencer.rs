use parking_lot::Mutex;

/// Минимальный id публикации по умолчанию.
pub const MIN_PUB_ID: u32 = 0;
/// Максимальный id публикации по умолчанию.
pub const MAX_PUB_ID: u32 = u32::MAX;

/// Потокобезопасный генератор id публикаций.
///
/// Выдаёт строго возрастающие id из `[min, max]`; после `max` следующий
/// вызов снова начинает с `min`.
#[derive(Debug)]
pub struct PublicationSequencer {
    min: u32,
    max: u32,
    /// Следующий id. Хранится в `u64`, чтобы `max + 1` был представим.
    next: Mutex<u64>,
}

impl PublicationSequencer {
    pub fn new() -> Self {
        Self::with_range(MIN_PUB_ID, MAX_PUB_ID)
    }

    /// Генератор с произвольным диапазоном. Если `min > max`, границы
    /// меняются местами.
    pub fn with_range(
        min: u32,
        max: u32,
    ) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min,
            max,
            next: Mutex::new(min as u64),
        }
    }

    /// Возвращает текущий id и продвигает счётчик.
    pub fn next(&self) -> u32 {
        let mut next = self.next.lock();

        // Счётчик за пределами диапазона: выдаём минимум, дальше идём от
        // `min + 1`, чтобы не выдать минимум дважды подряд.
        if *next > self.max as u64 {
            *next = self.min as u64 + 1;
            if *next > self.max as u64 {
                *next = self.min as u64;
            }
            return self.min;
        }

        let id = *next as u32;
        *next = if id == self.max {
            self.min as u64
        } else {
            *next + 1
        };
        id
    }

    /// Id, который вернёт следующий вызов [`next`](Self::next).
    pub fn peek(&self) -> u32 {
        let next = *self.next.lock();
        if next > self.max as u64 {
            self.min
        } else {
            next as u32
        }
    }

    /// Сбрасывает счётчик на минимум.
    pub fn reset(&self) {
        *self.next.lock() = self.min as u64;
    }

    pub fn range(&self) -> (u32, u32) {
        (self.min, self.max)
    }

    #[cfg(test)]
    fn force_next(
        &self,
        value: u64,
    ) {
        *self.next.lock() = value;
    }
}

impl Default for PublicationSequencer {
    fn default() -> Self {
        Self::new()
    }
}
