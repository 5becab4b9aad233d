mod controller;
mod dispatcher;
mod loop_worker;

#[cfg(test)]
mod fakes;

pub use controller::DispatchController;
pub use dispatcher::{CycleOutcome, Dispatcher};
pub use loop_worker::dispatch_loop;
