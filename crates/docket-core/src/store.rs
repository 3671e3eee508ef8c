use std::cmp::Ordering;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Categories,
    Tasks,
}

impl Collection {
    pub fn name(self) -> &'static str {
        match self {
            Collection::Categories => "categories",
            Collection::Tasks => "tasks",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: Collection,
    pub filter: Option<(String, Value)>,
    pub order_by: Option<(String, Direction)>,
}

impl Query {
    pub fn all(collection: Collection) -> Self {
        Self {
            collection,
            filter: None,
            order_by: None,
        }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filter = Some((field.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some((field.to_string(), direction));
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match &self.filter {
            Some((field, expected)) => doc.fields.get(field) == Some(expected),
            None => true,
        }
    }

    /// Filters and orders `docs`. The sort is stable, so equal keys keep insertion order.
    pub fn run<'a, I>(&self, docs: I) -> Vec<Document>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        let mut out: Vec<Document> = docs
            .into_iter()
            .filter(|doc| self.matches(doc))
            .cloned()
            .collect();

        if let Some((field, direction)) = &self.order_by {
            out.sort_by(|a, b| {
                let ord = compare_field(a.fields.get(field), b.fields.get(field));
                match direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            });
        }

        out
    }
}

/// Missing fields sort before present ones, numbers compare numerically and
/// strings lexicographically. Values of differing kinds compare by kind rank.
fn compare_field(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare_values(a, b),
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Update {
        collection: Collection,
        id: Uuid,
        fields: Map<String, Value>,
    },
    Delete {
        collection: Collection,
        id: Uuid,
    },
}

/// Writes applied together: either every op lands or none does.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn update(&mut self, collection: Collection, id: Uuid, fields: Map<String, Value>) {
        self.ops.push(WriteOp::Update {
            collection,
            id,
            fields,
        });
    }

    pub fn delete(&mut self, collection: Collection, id: Uuid) {
        self.ops.push(WriteOp::Delete { collection, id });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotEvent {
    Snapshot(Vec<Document>),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Receiving end of a live query.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub query: Query,
    rx: Receiver<SnapshotEvent>,
}

impl Subscription {
    /// Drains everything delivered so far without blocking.
    pub fn drain(&self) -> Vec<SnapshotEvent> {
        let mut out = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(event) => out.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }
}

/// The hosted document database as the application sees it.
pub trait DocumentStore {
    fn create(
        &mut self,
        collection: Collection,
        fields: Map<String, Value>,
    ) -> anyhow::Result<Uuid>;

    fn update(
        &mut self,
        collection: Collection,
        id: Uuid,
        fields: Map<String, Value>,
    ) -> anyhow::Result<()>;

    fn delete(&mut self, collection: Collection, id: Uuid) -> anyhow::Result<()>;

    fn query(&self, query: &Query) -> anyhow::Result<Vec<Document>>;

    fn listen(&mut self, query: Query) -> anyhow::Result<Subscription>;

    fn unlisten(&mut self, id: SubscriptionId);

    fn commit(&mut self, batch: WriteBatch) -> anyhow::Result<()>;
}

#[derive(Debug)]
struct Listener {
    id: SubscriptionId,
    query: Query,
    tx: Sender<SnapshotEvent>,
}

/// Live-query bookkeeping shared by store implementations.
#[derive(Debug, Default)]
pub(crate) struct Listeners {
    next_id: u64,
    entries: Vec<Listener>,
}

impl Listeners {
    /// Registers a live query and delivers its initial snapshot over `docs`.
    pub(crate) fn register(&mut self, query: Query, docs: &[Document]) -> Subscription {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        let (tx, rx) = mpsc::channel();
        let _ = tx.send(SnapshotEvent::Snapshot(query.run(docs)));
        self.entries.push(Listener {
            id,
            query: query.clone(),
            tx,
        });
        Subscription { id, query, rx }
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|l| l.id != id);
        before != self.entries.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Pushes a fresh snapshot to every listener on `collection`, pruning dead receivers.
    pub(crate) fn notify(&mut self, collection: Collection, docs: &[Document]) {
        self.entries.retain(|listener| {
            if listener.query.collection != collection {
                return true;
            }
            let snapshot = listener.query.run(docs);
            listener.tx.send(SnapshotEvent::Snapshot(snapshot)).is_ok()
        });
    }

    pub(crate) fn fail_all(&mut self, message: &str) {
        self.entries.retain(|listener| {
            listener
                .tx
                .send(SnapshotEvent::Error(message.to_string()))
                .is_ok()
        });
    }
}
