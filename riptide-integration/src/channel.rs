use derive_more::Constructor;
use tracing::warn;

/// Transmitter of items to an asynchronous consumer.
///
/// Sending never blocks the caller: implementations either enqueue or fail
/// fast, so publishers stay responsive regardless of consumer speed.
pub trait Tx
where
    Self: Clone + Send,
{
    type Item;
    type Error;
    fn send(&self, item: Self::Item) -> Result<(), Self::Error>;
}

#[derive(Debug)]
pub struct SendError;

#[derive(Debug)]
pub struct UnboundedTx<T> {
    pub tx: tokio::sync::mpsc::UnboundedSender<T>,
}

// Manual impl: the sender clones regardless of whether `T` does
impl<T> Clone for UnboundedTx<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> UnboundedTx<T> {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<T>) -> Self {
        Self { tx }
    }
}

impl<T> Tx for UnboundedTx<T>
where
    T: Send,
{
    type Item = T;
    type Error = SendError;

    fn send(&self, item: Self::Item) -> Result<(), Self::Error> {
        self.tx.send(item).map_err(|_| SendError)
    }
}

#[derive(Debug, Constructor)]
pub struct UnboundedRx<T> {
    pub rx: tokio::sync::mpsc::UnboundedReceiver<T>,
}

impl<T> UnboundedRx<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

/// Construct an unbounded mpsc channel pair.
pub fn mpsc_unbounded<T>() -> (UnboundedTx<T>, UnboundedRx<T>) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    (UnboundedTx::new(tx), UnboundedRx::new(rx))
}

/// [`Tx`] wrapper that disables itself once the receiver is dropped, rather
/// than erroring on every subsequent send.
#[derive(Debug, Clone)]
pub struct TxDroppable<ChannelTx> {
    pub state: TxState<ChannelTx>,
}

#[derive(Debug, Clone)]
pub enum TxState<ChannelTx> {
    Active(ChannelTx),
    Disabled,
}

impl<ChannelTx> TxDroppable<ChannelTx>
where
    ChannelTx: Tx,
{
    pub fn new(tx: ChannelTx) -> Self {
        Self {
            state: TxState::Active(tx),
        }
    }

    pub fn send(&mut self, item: ChannelTx::Item) {
        let TxState::Active(tx) = &self.state else {
            return;
        };

        if tx.send(item).is_err() {
            let name = std::any::type_name::<ChannelTx::Item>();
            warn!(name, "TxDroppable receiver dropped - items will no longer be sent");
            self.state = TxState::Disabled;
        }
    }
}
