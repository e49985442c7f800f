/// The host networking stack collaborator: receives packets that passed the
/// fast path. Delivery transfers ownership of the freshly allocated packet
/// bytes; the receive buffer page itself never leaves the datapath on this
/// path.
pub trait HostStack: Send + Sync {
    fn deliver(&self, qid: u16, packet: Vec<u8>);
}

/// External target for `Verdict::Redirect` packets. The frame is lent for the
/// duration of the call; accounting is the datapath's only other involvement.
pub trait RedirectTarget: Send + Sync {
    fn redirect(&self, qid: u16, frame: &[u8]);
}

/// A host stack that silently discards, for interfaces brought up before the
/// real stack attaches.
#[derive(Debug, Default)]
pub struct NullStack;

impl HostStack for NullStack {
    fn deliver(&self, _qid: u16, _packet: Vec<u8>) {}
}
