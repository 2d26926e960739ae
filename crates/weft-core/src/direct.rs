//! Direct in-process connections.
//!
//! A [`DirectConnection`] pair joins two bus nodes living in the same
//! process through a pair of unbounded channels. The [`DirectAcceptor`]
//! produces the server halves of such pairs for a router, while cloneable
//! [`DirectConnector`] handles let other threads attach new endpoints at
//! any time.

use std::{collections::VecDeque, time::Instant};

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

use crate::{
    connection::{Acceptor, Connection, ConnectionKind, FetchHandler},
    constants::DIRECT_DATA_SIZE,
    identifier::Identifier,
    message::{Message, MessageId},
};

const DIRECT_TYPE: Identifier = Identifier::new("Direct");

type Record = (MessageId, Message, Instant);

/// One half of an in-process connection pair.
#[derive(Debug)]
pub struct DirectConnection {
    tx: Sender<Record>,
    rx: Receiver<Record>,
    queue: VecDeque<Record>,
    usable: bool,
}

impl DirectConnection {
    /// Creates a connected pair of in-process connections.
    pub fn pair() -> (DirectConnection, DirectConnection) {
        let (a_tx, a_rx) = unbounded();
        let (b_tx, b_rx) = unbounded();
        (
            DirectConnection { tx: a_tx, rx: b_rx, queue: VecDeque::new(), usable: true },
            DirectConnection { tx: b_tx, rx: a_rx, queue: VecDeque::new(), usable: true },
        )
    }
}

impl Connection for DirectConnection {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::InProcess
    }

    fn type_id(&self) -> Identifier {
        DIRECT_TYPE
    }

    fn max_data_size(&self) -> Option<usize> {
        Some(DIRECT_DATA_SIZE)
    }

    fn is_usable(&self) -> bool {
        self.usable
    }

    fn send(&mut self, msg_id: MessageId, message: &Message) -> bool {
        if !self.usable {
            return false;
        }
        if self.tx.send((msg_id, message.clone(), Instant::now())).is_err() {
            self.usable = false;
            return false;
        }
        true
    }

    fn fetch_messages(&mut self, handler: FetchHandler) -> bool {
        loop {
            match self.rx.try_recv() {
                Ok(record) => self.queue.push_back(record),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.usable = false;
                    break;
                }
            }
        }
        // Messages the handler does not consume stay queued in order
        let mut fetched = false;
        while let Some((msg_id, message, sent_at)) = self.queue.front() {
            if handler(*msg_id, sent_at.elapsed(), message) {
                self.queue.pop_front();
                fetched = true;
            } else {
                break;
            }
        }
        fetched
    }

    fn cleanup(&mut self) {
        self.usable = false;
    }
}

/// Cloneable handle creating new connections against a [`DirectAcceptor`].
#[derive(Clone, Debug)]
pub struct DirectConnector {
    tx: Sender<DirectConnection>,
}

impl DirectConnector {
    /// Creates a new connection pair, hands the server half to the
    /// acceptor and returns the client half.
    ///
    /// Returns `None` when the acceptor no longer exists.
    pub fn connect(&self) -> Option<DirectConnection> {
        let (client, server) = DirectConnection::pair();
        if self.tx.send(server).is_err() {
            return None;
        }
        Some(client)
    }
}

/// Acceptor producing the server halves of in-process connection pairs.
#[derive(Debug)]
pub struct DirectAcceptor {
    incoming: Receiver<DirectConnection>,
    connector: DirectConnector,
}

impl DirectAcceptor {
    /// Creates a new direct acceptor.
    pub fn new() -> Self {
        let (tx, incoming) = unbounded();
        Self { incoming, connector: DirectConnector { tx } }
    }

    /// Returns a handle for attaching new connections to this acceptor.
    pub fn connector(&self) -> DirectConnector {
        self.connector.clone()
    }
}

impl Default for DirectAcceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Acceptor for DirectAcceptor {
    fn kind(&self) -> ConnectionKind {
        ConnectionKind::InProcess
    }

    fn type_id(&self) -> Identifier {
        DIRECT_TYPE
    }

    fn update(&mut self) -> bool {
        false
    }

    fn process_accepted(&mut self, handler: &mut dyn FnMut(Box<dyn Connection>)) -> bool {
        let mut accepted = false;
        while let Ok(connection) = self.incoming.try_recv() {
            accepted = true;
            handler(Box::new(connection));
        }
        accepted
    }
}
