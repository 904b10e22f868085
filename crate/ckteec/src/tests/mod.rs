//! Orchestrator tests against the simulated trusted application.
#![allow(clippy::unwrap_used)]

use tracing::level_filters::LevelFilter;

use crate::{
    Context, ContextConfig, ModuleResult, SessionFlags, SessionHandle, logging::log_init,
};

mod tokens;

use mock_ta::MockTa;

fn initialized_context() -> Context<MockTa> {
    log_init(LevelFilter::INFO);
    let ctx = Context::new(MockTa::default(), ContextConfig::default());
    ctx.initialize().unwrap();
    ctx
}

fn open_rw_session(ctx: &Context<MockTa>) -> ModuleResult<SessionHandle> {
    ctx.open_session(0, SessionFlags::SerialSession | SessionFlags::RwSession)
}
