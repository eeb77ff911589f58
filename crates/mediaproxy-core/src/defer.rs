//! Scoped deferred cleanup (spec.md §4.1.4).
//!
//! Grounded on `original_source/media-proxy/include/mesh/concurrency.h`'s
//! `thread::Defer`. Multiple guards declared in the same scope run in
//! reverse declaration order, same as C++ destructors unwinding a stack.

pub struct Defer<F: FnOnce()> {
    callback: Option<F>,
}

impl<F: FnOnce()> Defer<F> {
    pub fn new(callback: F) -> Self {
        Defer {
            callback: Some(callback),
        }
    }
}

impl<F: FnOnce()> Drop for Defer<F> {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn guards_run_in_reverse_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        {
            let o1 = order.clone();
            let _d1 = Defer::new(move || o1.lock().unwrap().push(1));
            let o2 = order.clone();
            let _d2 = Defer::new(move || o2.lock().unwrap().push(2));
        }
        assert_eq!(*order.lock().unwrap(), vec![2, 1]);
    }
}
