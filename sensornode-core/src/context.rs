use crate::config::Configuration;
use crate::error_handler::{Disposition, ErrorHandler};
use crate::platform::Power;
use crate::transport::Transport;

/// Collaborators lent to a component for the duration of one operation.
pub struct NodeContext<'a, T: Transport> {
    pub transport: &'a mut T,
    pub config: &'a mut Configuration,
    pub power: &'a mut dyn Power,
    pub errors: &'a ErrorHandler,
}

impl<'a, T: Transport> NodeContext<'a, T> {
    pub fn new(
        transport: &'a mut T,
        config: &'a mut Configuration,
        power: &'a mut dyn Power,
        errors: &'a ErrorHandler,
    ) -> Self {
        Self {
            transport,
            config,
            power,
            errors,
        }
    }

    pub async fn report_error(&mut self, message: &str) -> Disposition {
        self.errors
            .handle_error(message, &mut *self.transport, &mut *self.power)
            .await
    }
}
