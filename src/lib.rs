//! A symbolic inference core for a hybrid exact/approximate probabilistic
//! programming engine.
//!
//! Each random variable is tracked either symbolically, as a closed-form
//! distribution updated in place by conjugate rewrite rules, or collapsed to
//! a sampled constant, with the choice made per-variable at runtime by one
//! of three interchangeable strategies ([`strategy::ssi`], [`strategy::ds`],
//! [`strategy::bp`]). An abstract-interpretation twin predicts, ahead of
//! execution, which encoding each variable will end up with.

pub mod abs_conjugate;
pub mod abs_distr;
pub mod abs_expr;
pub mod abs_state;
pub mod abs_strategy;
pub mod conjugate;
pub mod distr;
pub mod engine;
pub mod error;
pub mod expr;
pub mod identifier;
pub mod particle;
pub mod plan;
pub mod sampling;
pub mod state;
pub mod strategy;
pub mod value;
