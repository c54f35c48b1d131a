//! Minimal observer list.
//!
//! Observers are notified in the order they were added. An observer may not
//! add or remove observers of the same list while it is being notified.

/// Handle returned by [`Observable::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

pub struct Observable<T> {
    observers: Vec<(ObserverId, Box<dyn FnMut(&T)>)>,
    next_id: u64,
}

impl<T> Default for Observable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Observable<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
            next_id: 0,
        }
    }

    pub fn add(&mut self, observer: impl FnMut(&T) + 'static) -> ObserverId {
        self.next_id += 1;
        let id = ObserverId(self.next_id);
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer, _)| *observer != id);
        self.observers.len() != before
    }

    pub fn notify(&mut self, value: &T) {
        for (_, observer) in &mut self.observers {
            observer(value);
        }
    }

    #[inline]
    #[must_use]
    pub fn has_observers(&self) -> bool {
        !self.observers.is_empty()
    }

    pub fn clear(&mut self) {
        self.observers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn notifies_in_insertion_order_and_removes() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut observable = Observable::<u32>::new();

        let first = {
            let log = Rc::clone(&log);
            observable.add(move |v| log.borrow_mut().push(("first", *v)))
        };
        {
            let log = Rc::clone(&log);
            observable.add(move |v| log.borrow_mut().push(("second", *v)));
        }

        observable.notify(&1);
        assert!(observable.remove(first));
        observable.notify(&2);

        assert_eq!(*log.borrow(), vec![("first", 1), ("second", 1), ("second", 2)]);
    }
}
