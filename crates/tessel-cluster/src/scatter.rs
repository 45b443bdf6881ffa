// crates/tessel-cluster/src/scatter.rs
//
// Scatter/gather fan-out over a set of nodes.
//
// One forwarding task per contacted node drains that node's element stream
// into a single shared channel sized to the node count. Each task owns a
// sender clone; the shared channel closes once every forwarder has finished,
// which is the gatherer's only termination signal. Results arrive in
// completion order, tagged with the hash of the node that produced them.

use std::sync::Arc;

use tokio::sync::mpsc;

use tessel_core::{Element, ElementStream, Node};

/// Receiving side of a fan-out.
#[derive(Debug)]
pub struct Gathered {
    /// Number of nodes contacted.
    pub total: usize,
    rx: mpsc::Receiver<(u32, Element)>,
}

impl Gathered {
    /// Next `(node_hash, element)` pair, or `None` once every node is done.
    pub async fn recv(&mut self) -> Option<(u32, Element)> {
        self.rx.recv().await
    }

    /// Drain everything.
    pub async fn collect(mut self) -> Vec<(u32, Element)> {
        let mut out = Vec::with_capacity(self.total);
        while let Some(item) = self.rx.recv().await {
            out.push(item);
        }
        out
    }
}

/// Issue `call` against every node concurrently and gather the replies.
///
/// There is no deadline: a node that never closes its stream holds the
/// gatherer open. Per-node timeouts belong to the node's transport.
pub fn scatter<F>(nodes: &[Arc<dyn Node>], call: F) -> Gathered
where
    F: Fn(&dyn Node) -> ElementStream,
{
    let (tx, rx) = mpsc::channel(nodes.len().max(1));
    for node in nodes {
        let mut stream = call(node.as_ref());
        let tx = tx.clone();
        let hash = node.hash();
        tokio::spawn(async move {
            while let Some(element) = stream.recv().await {
                if tx.send((hash, element)).await.is_err() {
                    break;
                }
            }
        });
    }
    Gathered {
        total: nodes.len(),
        rx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tessel_core::{Field, FieldValueScore, Key, TesselError};

    /// Node that answers `size` with a fixed number after a delay.
    struct Fixed {
        hash: u32,
        answer: i64,
        delay: Duration,
    }

    impl Fixed {
        fn reply(&self, element: Element) -> ElementStream {
            let (tx, rx) = mpsc::channel(1);
            let delay = self.delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(element).await;
            });
            rx
        }

        fn unsupported(&self) -> ElementStream {
            self.reply(Element::Error(TesselError::Node("unsupported".into())))
        }
    }

    impl Node for Fixed {
        fn hash(&self) -> u32 {
            self.hash
        }
        fn host(&self) -> &str {
            "fixed"
        }
        fn insert(&self, _: &Key, _: Vec<FieldValueScore>) -> ElementStream {
            self.unsupported()
        }
        fn delete(&self, _: &Key, _: Vec<FieldValueScore>) -> ElementStream {
            self.unsupported()
        }
        fn select(&self, _: &Key, _: &Field) -> ElementStream {
            self.unsupported()
        }
        fn keys(&self) -> ElementStream {
            self.unsupported()
        }
        fn size(&self, _: &Key) -> ElementStream {
            self.reply(Element::Int64(self.answer))
        }
        fn members(&self, _: &Key) -> ElementStream {
            self.unsupported()
        }
        fn score(&self, _: &Key, _: &Field) -> ElementStream {
            self.unsupported()
        }
    }

    #[tokio::test]
    async fn gathers_every_reply_in_completion_order() {
        let nodes: Vec<Arc<dyn Node>> = vec![
            Arc::new(Fixed {
                hash: 1,
                answer: 10,
                delay: Duration::from_millis(60),
            }),
            Arc::new(Fixed {
                hash: 2,
                answer: 20,
                delay: Duration::from_millis(0),
            }),
        ];
        let key = Key::new("k");
        let gathered = scatter(&nodes, |n| n.size(&key));
        assert_eq!(gathered.total, 2);
        let replies = gathered.collect().await;
        assert_eq!(replies, vec![(2, Element::Int64(20)), (1, Element::Int64(10))]);
    }

    #[tokio::test]
    async fn empty_node_set_closes_immediately() {
        let key = Key::new("k");
        let mut gathered = scatter(&[], |n| n.size(&key));
        assert_eq!(gathered.total, 0);
        assert!(gathered.recv().await.is_none());
    }
}
