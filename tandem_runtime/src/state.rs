//! State machines.
//!
//! [`fsm`] holds the generic machine used by applications. PLC operation
//! modes have their own fixed transition table in [`crate::plc::opmode`].

pub mod fsm;

pub use fsm::{ExitPoint, GuardFn, State, StateChange, StateMachine, StateRef};
