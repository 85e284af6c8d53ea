/// Configuration of a debugging session.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct SessionConfig {
    /// Breakpoints to set once the debuggee is stopped for the first time.
    #[knus(children(name = "breakpoint"))]
    pub breakpoints: Vec<BreakpointConfig>,

    /// Maximum number of stops before the session ends.
    #[knus(child, default = 100, unwrap(argument))]
    pub max_stops: usize,

    /// What to do with the debuggee once the session ends.
    #[knus(child, default, unwrap(argument))]
    pub on_finish: OnFinish,
}

/// Configuration of a breakpoint.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct BreakpointConfig {
    /// Address of the breakpoint.
    #[knus(argument)]
    pub addr: u64,
}

/// What to do with a debuggee still alive when the session ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, knus::DecodeScalar)]
pub enum OnFinish {
    /// Kill the debuggee.
    #[default]
    Kill,

    /// Let the debuggee run without the debugger.
    Detach,
}
