//! Push-pull reactive cell graph.
//!
//! Source cells ([`State`]) hold values written by the host, derived cells
//! ([`Computed`]) cache pure functions of other cells, and effects re-run
//! side effects when something they read changes. Writes push cheap
//! invalidation flags forward through the graph; values are pulled lazily,
//! and a dirty check keeps anything from recomputing unless one of its
//! inputs really changed.
//!
//! ```
//! use recell::core::Runtime;
//! use std::{cell::RefCell, rc::Rc};
//!
//! let mut rt = Runtime::new();
//! let count = rt.state(1);
//! let doubled = rt.computed(move |sc| count.get(sc) * 2);
//!
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let sink = log.clone();
//! let _sub = rt.effect(move |sc| sink.borrow_mut().push(doubled.get(sc)));
//!
//! count.set(3, rt.ac());
//! assert_eq!(*log.borrow(), vec![2, 6]);
//! ```

mod computed;
pub mod core;
mod effect_fn;
mod state;
mod subscription;

pub use computed::Computed;
pub use self::core::{spawn_action, ActionContext, CycleError, SignalContext};
pub use state::State;
pub use subscription::Subscription;
