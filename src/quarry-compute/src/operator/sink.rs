//! Terminal operators handing pages to the caller.

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use common_error::{QuarryError, QuarryResult};
use futures::Stream;
use tokio::sync::mpsc;

use super::{not_accepting, Operator};
use crate::data::Page;

type PageCallback = Box<dyn FnMut(Page) -> QuarryResult<()> + Send>;

/// Invokes a callback once per completed page.
pub struct PageConsumerOperator {
    consumer: PageCallback,
    finished: bool,
}

impl PageConsumerOperator {
    pub fn new(consumer: impl FnMut(Page) -> QuarryResult<()> + Send + 'static) -> Self {
        Self {
            consumer: Box::new(consumer),
            finished: false,
        }
    }

    /// A consumer that appends every page to a shared vector.
    pub fn collecting() -> (Self, Arc<Mutex<Vec<Page>>>) {
        let pages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&pages);
        let op = Self::new(move |page| {
            sink.lock().unwrap_or_else(PoisonError::into_inner).push(page);
            Ok(())
        });
        (op, pages)
    }

    /// A consumer forwarding pages to an async stream. The stream ends
    /// once the operator is dropped.
    pub fn streaming() -> (Self, PageStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let op = Self::new(move |page| {
            tx.send(page)
                .map_err(|_| QuarryError::cancelled("page stream receiver dropped"))
        });
        (op, PageStream { rx })
    }
}

/// Pages produced by a [`PageConsumerOperator::streaming`] sink.
#[derive(Debug)]
pub struct PageStream {
    rx: mpsc::UnboundedReceiver<Page>,
}

impl Stream for PageStream {
    type Item = Page;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Page>> {
        self.rx.poll_recv(cx)
    }
}

impl fmt::Debug for PageConsumerOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageConsumerOperator")
            .field("finished", &self.finished)
            .finish()
    }
}

impl Operator for PageConsumerOperator {
    fn name(&self) -> &'static str {
        "PageConsumerOperator"
    }

    fn needs_input(&self) -> bool {
        !self.finished
    }

    fn add_input(&mut self, page: Page) -> QuarryResult<()> {
        if self.finished {
            return Err(not_accepting(self.name()));
        }
        (self.consumer)(page)
    }

    fn finish(&mut self) {
        self.finished = true;
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn get_output(&mut self) -> QuarryResult<Option<Page>> {
        Ok(None)
    }

    fn close(&mut self) {
        self.finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::BlockFactory;

    #[test]
    fn test_collecting_consumer() {
        let factory = BlockFactory::unlimited();
        let (mut sink, pages) = PageConsumerOperator::collecting();
        sink.add_input(Page::new(vec![factory.constant_long(1, 3).unwrap()]).unwrap())
            .unwrap();
        sink.finish();
        assert!(sink.is_finished());
        assert!(sink.add_input(Page::new(vec![factory.constant_long(1, 1).unwrap()]).unwrap()).is_err());
        assert_eq!(pages.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_streaming_consumer() {
        use futures::StreamExt;

        let factory = BlockFactory::unlimited();
        let (mut sink, stream) = PageConsumerOperator::streaming();
        for n in 1..=3 {
            sink.add_input(Page::new(vec![factory.constant_long(7, n).unwrap()]).unwrap())
                .unwrap();
        }
        sink.finish();
        drop(sink);
        let counts: Vec<usize> = stream.map(|p| p.position_count()).collect().await;
        assert_eq!(counts, vec![1, 2, 3]);
    }
}
