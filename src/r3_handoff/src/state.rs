use crate::{error::BadContextError, Kernel, Port};

/// If the current context is not a task context, return `Err(BadContext)`.
pub(crate) fn expect_waitable_context<Traits: Port>(
    kernel: &Kernel<Traits>,
) -> Result<(), BadContextError> {
    if !kernel.port().is_task_context() {
        Err(BadContextError::BadContext)
    } else {
        Ok(())
    }
}

/// If the current context is an interrupt context, return `Err(BadContext)`.
pub(crate) fn expect_non_interrupt_context<Traits: Port>(
    kernel: &Kernel<Traits>,
) -> Result<(), BadContextError> {
    if kernel.port().is_interrupt_context() {
        Err(BadContextError::BadContext)
    } else {
        Ok(())
    }
}
