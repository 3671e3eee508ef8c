use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow, bail};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::{
    Collection, Document, DocumentStore, Listeners, Query, Subscription, SubscriptionId,
    WriteBatch, WriteOp,
};

const COLLECTIONS: [Collection; 2] = [Collection::Categories, Collection::Tasks];

/// Document store backed by one JSONL file per collection, or by memory alone.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: Option<PathBuf>,
    categories: Vec<Document>,
    tasks: Vec<Document>,
    listeners: Listeners,
    offline: bool,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let mut store = Self {
            data_dir: Some(data_dir.clone()),
            ..Self::in_memory()
        };

        for collection in COLLECTIONS {
            let path = collection_path(&data_dir, collection);
            if !path.exists() {
                fs::write(&path, "")?;
            }
            let docs = load_jsonl(&path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            *store.docs_mut(collection) = docs;
        }

        info!(
            data_dir = %data_dir.display(),
            categories = store.categories.len(),
            tasks = store.tasks.len(),
            "opened datastore"
        );

        Ok(store)
    }

    pub fn in_memory() -> Self {
        Self {
            data_dir: None,
            categories: Vec::new(),
            tasks: Vec::new(),
            listeners: Listeners::default(),
            offline: false,
        }
    }

    /// Simulates losing or regaining the connection. Going offline errors every
    /// listener; coming back re-delivers fresh snapshots.
    #[tracing::instrument(skip(self))]
    pub fn set_offline(&mut self, offline: bool) {
        if self.offline == offline {
            return;
        }
        self.offline = offline;
        if offline {
            warn!("datastore offline");
            self.listeners.fail_all("connection lost");
        } else {
            info!("datastore back online");
            for collection in COLLECTIONS {
                let docs = self.docs(collection).to_vec();
                self.listeners.notify(collection, &docs);
            }
        }
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn docs(&self, collection: Collection) -> &Vec<Document> {
        match collection {
            Collection::Categories => &self.categories,
            Collection::Tasks => &self.tasks,
        }
    }

    fn docs_mut(&mut self, collection: Collection) -> &mut Vec<Document> {
        match collection {
            Collection::Categories => &mut self.categories,
            Collection::Tasks => &mut self.tasks,
        }
    }

    fn ensure_online(&self) -> anyhow::Result<()> {
        if self.offline {
            bail!("datastore is offline");
        }
        Ok(())
    }

    /// Writes every touched collection to a temp file before replacing any of
    /// the data files.
    fn persist(&self, touched: &[Collection]) -> anyhow::Result<()> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };

        let mut staged = Vec::with_capacity(touched.len());
        for collection in touched {
            let path = collection_path(dir, *collection);
            let temp = stage_jsonl(&path, self.docs(*collection))
                .with_context(|| format!("failed to save {}", path.display()))?;
            staged.push((path, temp));
        }
        for (path, temp) in staged {
            temp.persist(&path)
                .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
        }
        Ok(())
    }

    /// Persists the touched collections, then pushes fresh snapshots to
    /// listeners. On failure memory goes back to `previous` and the files are
    /// re-saved from it, so disk and memory keep agreeing.
    fn settle(
        &mut self,
        touched: &[Collection],
        previous: (Vec<Document>, Vec<Document>),
    ) -> anyhow::Result<()> {
        if let Err(err) = self.persist(touched) {
            self.categories = previous.0;
            self.tasks = previous.1;
            if let Err(restore) = self.persist(touched) {
                warn!(error = %restore, "failed to restore data files after rollback");
            }
            return Err(err);
        }
        for collection in touched {
            let docs = self.docs(*collection).to_vec();
            self.listeners.notify(*collection, &docs);
        }
        Ok(())
    }

    fn snapshot(&self) -> (Vec<Document>, Vec<Document>) {
        (self.categories.clone(), self.tasks.clone())
    }
}

impl DocumentStore for DataStore {
    #[tracing::instrument(skip_all, fields(collection = %collection))]
    fn create(
        &mut self,
        collection: Collection,
        data: Map<String, Value>,
    ) -> anyhow::Result<Uuid> {
        self.ensure_online()?;
        let previous = self.snapshot();
        let id = Uuid::new_v4();
        self.docs_mut(collection).push(Document { id, fields: data });
        self.settle(&[collection], previous)?;
        debug!(%id, "created document");
        Ok(id)
    }

    #[tracing::instrument(skip_all, fields(collection = %collection, id = %id))]
    fn update(
        &mut self,
        collection: Collection,
        id: Uuid,
        data: Map<String, Value>,
    ) -> anyhow::Result<()> {
        self.ensure_online()?;
        let previous = self.snapshot();
        merge_into(self.docs_mut(collection), id, data)
            .with_context(|| format!("failed to update {collection}/{id}"))?;
        self.settle(&[collection], previous)
    }

    #[tracing::instrument(skip_all, fields(collection = %collection, id = %id))]
    fn delete(&mut self, collection: Collection, id: Uuid) -> anyhow::Result<()> {
        self.ensure_online()?;
        let previous = self.snapshot();
        let docs = self.docs_mut(collection);
        let before = docs.len();
        docs.retain(|doc| doc.id != id);
        if docs.len() == before {
            debug!("delete of missing document is a no-op");
            return Ok(());
        }
        self.settle(&[collection], previous)
    }

    #[tracing::instrument(skip(self, query), fields(collection = %query.collection))]
    fn query(&self, query: &Query) -> anyhow::Result<Vec<Document>> {
        self.ensure_online()?;
        let out = query.run(self.docs(query.collection));
        debug!(count = out.len(), "query returned");
        Ok(out)
    }

    #[tracing::instrument(skip(self, query), fields(collection = %query.collection))]
    fn listen(&mut self, query: Query) -> anyhow::Result<Subscription> {
        self.ensure_online()?;
        let docs = self.docs(query.collection).to_vec();
        let sub = self.listeners.register(query, &docs);
        debug!(id = sub.id.0, "listener registered");
        Ok(sub)
    }

    fn unlisten(&mut self, id: SubscriptionId) {
        if self.listeners.remove(id) {
            debug!(id = id.0, "listener removed");
        }
    }

    #[tracing::instrument(skip(self, batch), fields(ops = batch.len()))]
    fn commit(&mut self, batch: WriteBatch) -> anyhow::Result<()> {
        self.ensure_online()?;
        let previous = self.snapshot();
        let mut touched: Vec<Collection> = Vec::new();

        for op in batch.ops {
            let (collection, result) = match op {
                WriteOp::Update {
                    collection,
                    id,
                    fields,
                } => (
                    collection,
                    merge_into(self.docs_mut(collection), id, fields)
                        .with_context(|| format!("batch update of {collection}/{id} failed")),
                ),
                WriteOp::Delete { collection, id } => {
                    self.docs_mut(collection).retain(|doc| doc.id != id);
                    (collection, Ok(()))
                }
            };

            if let Err(err) = result {
                self.categories = previous.0;
                self.tasks = previous.1;
                return Err(err);
            }
            if !touched.contains(&collection) {
                touched.push(collection);
            }
        }

        self.settle(&touched, previous)
    }
}

fn merge_into(docs: &mut [Document], id: Uuid, fields: Map<String, Value>) -> anyhow::Result<()> {
    let doc = docs
        .iter_mut()
        .find(|doc| doc.id == id)
        .ok_or_else(|| anyhow!("document not found: {id}"))?;
    for (key, value) in fields {
        doc.fields.insert(key, value);
    }
    Ok(())
}

fn collection_path(dir: &Path, collection: Collection) -> PathBuf {
    dir.join(format!("{}.data", collection.name()))
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> anyhow::Result<Vec<Document>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let doc: Document = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(doc);
    }

    debug!(count = out.len(), "loaded documents from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, docs))]
fn stage_jsonl(path: &Path, docs: &[Document]) -> anyhow::Result<NamedTempFile> {
    debug!(file = %path.display(), count = docs.len(), "staging jsonl");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for doc in docs {
        let serialized = serde_json::to_string(doc)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    Ok(temp)
}
