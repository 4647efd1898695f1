// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::error::Result;

/// Outcome of one state step.
pub enum Transition<S, R> {
    /// Move to `S`.
    Next(S, R),
    /// Repeat the current state.
    Stay(R),
    /// Machine finished.
    Done(R),
}

pub trait StateMachine<Ctx, Resp>: Sized {
    type StepResult<'a>: Future<Output = Resp> + Send + 'a
    where
        Self: 'a,
        Resp: 'a,
        Ctx: 'a;

    fn step<'a>(&'a self, ctx: &'a mut Ctx) -> Self::StepResult<'a>;
}

pub trait StateMachineCtx<Ctx, Out = ()>: Sized {
    fn execute(&mut self) -> impl Future<Output = Result<Out>> + Send;
}
