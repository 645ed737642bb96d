use deck_types::ElementId;

/// Capability to bypass permission filtering.
///
/// Only [`Kernel::system`](crate::Kernel::system) hands these out, so every
/// unfiltered call site is visible in the code that holds a kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SystemToken(());

impl SystemToken {
    pub(crate) fn issue() -> Self {
        Self(())
    }
}

/// Who a kernel operation runs on behalf of.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Caller {
    /// A session element; reads are filtered through its actor's roles.
    Session(ElementId),
    /// Unrestricted access.
    System(SystemToken),
}

impl Caller {
    pub fn session(id: ElementId) -> Self {
        Self::Session(id)
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }
}
