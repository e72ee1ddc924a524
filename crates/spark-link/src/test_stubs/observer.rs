use std::sync::Arc;

use parking_lot::Mutex;

use crate::observable::Observer;

/// 被记录的一条通知。
#[derive(Clone, Debug)]
pub enum Event<T, E> {
    Next(T),
    Error(E),
    Complete,
}

/// 把所有通知追加到共享列表的观察者。
pub struct RecordingObserver<T, E> {
    events: Arc<Mutex<Vec<Event<T, E>>>>,
}

/// [`RecordingObserver`] 的只读视图。
pub struct Recording<T, E> {
    events: Arc<Mutex<Vec<Event<T, E>>>>,
}

impl<T, E> Clone for Recording<T, E> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
        }
    }
}

/// 创建一对共享同一记录的观察者与视图。
pub fn recording<T, E>() -> (RecordingObserver<T, E>, Recording<T, E>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    (
        RecordingObserver {
            events: Arc::clone(&events),
        },
        Recording { events },
    )
}

impl<T, E> Observer<T, E> for RecordingObserver<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn on_next(&mut self, value: T) {
        self.events.lock().push(Event::Next(value));
    }

    fn on_error(&mut self, error: E) {
        self.events.lock().push(Event::Error(error));
    }

    fn on_complete(&mut self) {
        self.events.lock().push(Event::Complete);
    }
}

impl<T: Clone, E: Clone> Recording<T, E> {
    pub fn events(&self) -> Vec<Event<T, E>> {
        self.events.lock().clone()
    }

    pub fn values(&self) -> Vec<T> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Next(value) => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<E> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Error(error) => Some(error.clone()),
                _ => None,
            })
            .collect()
    }
}

impl<T, E> Recording<T, E> {
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn completed(&self) -> bool {
        self.events
            .lock()
            .iter()
            .any(|event| matches!(event, Event::Complete))
    }

    /// 终止通知（错误或完成）的数量；符合契约的流至多为 1。
    pub fn terminal_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| !matches!(event, Event::Next(_)))
            .count()
    }
}
