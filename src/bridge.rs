use crate::action::Action;

/// A time-travel debugger attached to a store.
///
/// The store calls [`send`](DebugBridge::send) after every accepted
/// dispatch, outside its internal lock. A bridge may drive the store back
/// through [`Store::replace_state`](crate::Store::replace_state) (reset,
/// rollback, jump) and [`Store::dispatch`](crate::Store::dispatch) (replay),
/// typically from its own thread.
pub trait DebugBridge<S>: Send + Sync {
    fn send(&self, action: &Action, state: Option<&S>);
}
