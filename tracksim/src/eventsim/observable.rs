use std::fmt::Debug;

/// A value that remembers whether it changed since it was last taken.
#[derive(Clone, Debug)]
pub struct Observable<T: Clone + Debug + PartialEq> {
    value: T,
    pending: bool,
}

impl<T: Clone + Debug + PartialEq> Observable<T> {
    pub fn new(value: T) -> Observable<T> {
        Observable { value, pending: false }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Setting the current value again is not a change.
    pub fn set(&mut self, x: T) -> bool {
        if self.value == x {
            return false;
        }
        self.value = x;
        self.pending = true;
        true
    }

    pub fn take(&mut self) -> Option<T> {
        if self.pending {
            self.pending = false;
            Some(self.value.clone())
        } else {
            None
        }
    }
}

#[test]
fn test_change_once() {
    let mut o = Observable::new(1.0);
    assert_eq!(o.take(), None);
    o.set(2.0);
    o.set(3.0);
    assert_eq!(o.take(), Some(3.0));
    assert_eq!(o.take(), None);
    assert!(!o.set(3.0));
}
