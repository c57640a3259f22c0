//! The one client the engine talks to, and the handle callers use to reach it.

use crate::device::DeviceState;
use crate::engine::Engine;
use crate::error::{HandlerError, SendError};
use crate::hbm::ClientProperties;
use crate::platform::Platform;
use crate::uuid::Uuid;
use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use log::{debug, info};

/// Consumer of complete client messages.
pub trait MessageHandler {
    fn on_message(&mut self, message: &[u8]);
}

impl<F> MessageHandler for F
where
    F: FnMut(&[u8]),
{
    #[inline]
    fn on_message(&mut self, message: &[u8]) {
        self(message);
    }
}

/// Identifies whoever registered a handler, so only they can remove it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct OwnerToken(pub usize);

pub(crate) struct RegisteredHandler {
    pub(crate) owner: OwnerToken,
    pub(crate) handler: Box<dyn MessageHandler + Send>,
}

pub(crate) struct Client {
    pub(crate) address: u8,
    pub(crate) properties: ClientProperties,
    pub(crate) active: bool,
    /// Set until the client has been started once.
    pub(crate) initial: bool,
    /// Fragments of the message currently being received.
    pub(crate) rx_cache: Vec<u8>,
    /// Complete messages not yet handed to the handler.
    pub(crate) inbox: VecDeque<Vec<u8>>,
    pub(crate) handler: Option<RegisteredHandler>,
}

impl Client {
    pub(crate) const fn new(address: u8, properties: ClientProperties) -> Self {
        Self {
            address,
            properties,
            active: true,
            initial: true,
            rx_cache: Vec::new(),
            inbox: VecDeque::new(),
            handler: None,
        }
    }

    /// Applies properties reported again after a reset or a dynamic add.
    pub(crate) const fn reset_properties(&mut self, address: u8, properties: ClientProperties) {
        self.address = address;
        self.properties = properties;
        self.active = true;
    }

    #[inline]
    pub(crate) fn max_message_length(&self) -> usize {
        usize::try_from(self.properties.max_msg_length).unwrap_or(usize::MAX)
    }

    pub(crate) fn start(&mut self) {
        let capacity = self.max_message_length();
        self.rx_cache.clear();
        self.rx_cache.reserve(capacity);
        self.initial = false;
        info!(
            "client {} started at address {}",
            self.properties.uuid, self.address
        );
    }

    /// Drops partial and undelivered input after the link went away.
    pub(crate) fn disconnect(&mut self) {
        if !self.rx_cache.is_empty() || !self.inbox.is_empty() {
            debug!(
                "client {} disconnected, dropping {} pending messages",
                self.properties.uuid,
                self.inbox.len() + usize::from(!self.rx_cache.is_empty())
            );
        }
        self.rx_cache.clear();
        self.inbox.clear();
    }

    /// Moves the cached fragments into the inbox. Returns `false` if there
    /// was nothing to move.
    pub(crate) fn message_complete(&mut self) -> bool {
        if self.rx_cache.is_empty() {
            return false;
        }
        let capacity = self.rx_cache.capacity();
        let message = core::mem::replace(&mut self.rx_cache, Vec::with_capacity(capacity));
        self.inbox.push_back(message);
        true
    }
}

impl<P: Platform> Engine<P> {
    /// Starts newly found clients and forgets the ones the ME no longer
    /// reports.
    pub(crate) fn rescan_clients(&mut self) {
        let Some(client) = self.client.as_mut() else {
            return;
        };
        if !client.active {
            info!("client {} is gone", client.properties.uuid);
            self.client = None;
        } else if client.initial {
            client.start();
        } else {
            debug!("client {} reconnected", client.properties.uuid);
        }
    }
}

/// Borrowed access to the recognized client.
pub struct ClientHandle<'a, P: Platform> {
    engine: &'a mut Engine<P>,
}

impl<'a, P: Platform> ClientHandle<'a, P> {
    pub(crate) const fn new(engine: &'a mut Engine<P>) -> Self {
        Self { engine }
    }

    fn client(&self) -> Option<&Client> {
        self.engine.client.as_ref()
    }

    /// Sends one message to the client.
    ///
    /// A blocking send returns once the last fragment has been written or
    /// the send timeout elapsed. A non-blocking send copies `data` and
    /// returns immediately; it is written on a later interrupt if the
    /// buffer is busy.
    ///
    /// # Errors
    /// - [`SendError::NoDevice`] unless the device is enabled and the client active.
    /// - [`SendError::MessageTooLarge`] if `data` exceeds the client's limit.
    /// - [`SendError::Timeout`] if a blocking send did not finish in time.
    /// - [`SendError::Aborted`] if the link reset while the message was queued.
    pub fn send(&mut self, data: &[u8], blocking: bool) -> Result<(), SendError> {
        self.engine.send_client_message(data, blocking)
    }

    /// Installs the consumer of complete messages.
    ///
    /// # Errors
    /// - [`HandlerError::AlreadyRegistered`] if a handler is already installed.
    /// - [`HandlerError::NoClient`] if the client is gone.
    pub fn register_handler<H>(&mut self, owner: OwnerToken, handler: H) -> Result<(), HandlerError>
    where
        H: MessageHandler + Send + 'static,
    {
        let Some(client) = self.engine.client.as_mut() else {
            return Err(HandlerError::NoClient);
        };
        if client.handler.is_some() {
            return Err(HandlerError::AlreadyRegistered);
        }
        client.handler = Some(RegisteredHandler {
            owner,
            handler: Box::new(handler),
        });
        Ok(())
    }

    /// Removes the handler if `owner` installed it. Returns whether a
    /// handler was removed.
    pub fn unregister_handler(&mut self, owner: OwnerToken) -> bool {
        let Some(client) = self.engine.client.as_mut() else {
            return false;
        };
        if client.handler.as_ref().is_some_and(|h| h.owner == owner) {
            client.handler = None;
            return true;
        }
        false
    }

    #[must_use]
    pub fn has_handler(&self) -> bool {
        self.client().is_some_and(|c| c.handler.is_some())
    }

    /// The client is connected and the device can carry messages.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.engine.device.state == DeviceState::Enabled && self.client().is_some_and(|c| c.active)
    }

    #[must_use]
    pub fn uuid(&self) -> Option<Uuid> {
        self.client().map(|c| c.properties.uuid)
    }

    #[must_use]
    pub fn address(&self) -> Option<u8> {
        self.client().map(|c| c.address)
    }

    #[must_use]
    pub fn max_message_length(&self) -> Option<usize> {
        self.client().map(Client::max_message_length)
    }

    #[must_use]
    pub fn properties(&self) -> Option<ClientProperties> {
        self.client().map(|c| c.properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::platform::tests::FakePlatform;
    use crate::uuid::TOUCH_CLIENT_UUID;

    fn properties(max: u32) -> ClientProperties {
        ClientProperties {
            uuid: TOUCH_CLIENT_UUID,
            protocol_version: 1,
            max_connections: 1,
            fixed_address: 0,
            single_recv_buf: false,
            vt_supported: false,
            max_msg_length: max,
        }
    }

    #[test]
    fn completed_messages_move_to_the_inbox() {
        let mut client = Client::new(5, properties(64));
        assert!(!client.message_complete());
        client.rx_cache.extend_from_slice(&[1, 2]);
        client.rx_cache.extend_from_slice(&[3]);
        assert!(client.message_complete());
        assert!(client.rx_cache.is_empty());
        assert_eq!(client.inbox.pop_front(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn disconnect_drops_pending_input() {
        let mut client = Client::new(5, properties(64));
        client.rx_cache.push(1);
        client.inbox.push_back(vec![2]);
        client.disconnect();
        assert!(client.rx_cache.is_empty());
        assert!(client.inbox.is_empty());
    }

    #[test]
    fn start_reserves_the_receive_cache() {
        let mut client = Client::new(5, properties(300));
        assert!(client.initial);
        client.start();
        assert!(!client.initial);
        assert!(client.rx_cache.capacity() >= 300);
    }

    #[test]
    fn closures_are_handlers() {
        let mut seen = Vec::new();
        let mut handler = |message: &[u8]| seen.push(message.to_vec());
        handler.on_message(b"abc");
        assert_eq!(seen, vec![b"abc".to_vec()]);
    }

    #[test]
    fn handler_needs_a_client() {
        let mut engine = Engine::new(FakePlatform::default(), EngineConfig::default());
        let mut handle = ClientHandle::new(&mut engine);
        assert_eq!(
            handle.register_handler(OwnerToken(1), |_: &[u8]| {}),
            Err(HandlerError::NoClient)
        );
        assert!(!handle.has_handler());
    }

    #[test]
    fn second_handler_is_refused() {
        let mut engine = Engine::new(FakePlatform::default(), EngineConfig::default());
        engine.client = Some(Client::new(5, properties(64)));
        let mut handle = ClientHandle::new(&mut engine);
        assert_eq!(handle.register_handler(OwnerToken(1), |_: &[u8]| {}), Ok(()));
        assert_eq!(
            handle.register_handler(OwnerToken(2), |_: &[u8]| {}),
            Err(HandlerError::AlreadyRegistered)
        );
        assert!(handle.unregister_handler(OwnerToken(1)));
    }
}
