//! A small in-memory document that applies deltas: enough to tell whether
//! two changes that should be equivalent have the same effect.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use tree_changeset::delta::{DeltaDetachedNodeRename, DeltaFieldMap, DeltaRoot};
use tree_changeset::{ChangeAtomId, FieldKey};

type Fields = BTreeMap<FieldKey, Vec<Node>>;

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub value: Value,
    pub fields: Fields,
}

impl Node {
    pub fn leaf(value: Value) -> Self {
        Self {
            value,
            fields: Fields::new(),
        }
    }

    fn snapshot(&self) -> Value {
        let fields = snapshot_fields(&self.fields);
        if fields.is_empty() {
            self.value.clone()
        } else {
            json!({ "value": self.value, "fields": fields })
        }
    }
}

fn snapshot_fields(fields: &Fields) -> Map<String, Value> {
    fields
        .iter()
        .filter(|(_, nodes)| !nodes.is_empty())
        .map(|(key, nodes)| (key.to_string(), nodes.iter().map(Node::snapshot).collect::<Value>()))
        .collect()
}

/// Root fields plus the content detached so far, by detached node id.
#[derive(Debug, Clone, Default)]
pub struct Document {
    root: Fields,
    detached: BTreeMap<ChangeAtomId, Node>,
}

impl Document {
    pub fn with_field(mut self, key: &str, values: impl IntoIterator<Item = Value>) -> Self {
        self.root
            .insert(FieldKey::from(key), values.into_iter().map(Node::leaf).collect());
        self
    }

    pub fn len(&self, key: &str) -> usize {
        self.root.get(&FieldKey::from(key)).map_or(0, Vec::len)
    }

    /// The attached part of the document.
    pub fn snapshot(&self) -> Value {
        Value::Object(snapshot_fields(&self.root))
    }

    pub fn applied(&self, delta: &DeltaRoot) -> Result<Document, String> {
        let mut next = self.clone();
        next.apply(delta)?;
        Ok(next)
    }

    /// Applies `delta`: builds, then every detach, then renames of detached
    /// content, then every attach, then destructions.
    pub fn apply(&mut self, delta: &DeltaRoot) -> Result<(), String> {
        for build in &delta.build {
            for (offset, tree) in (0..).zip(&build.trees) {
                self.detached.insert(build.id.offset(offset), Node::leaf(tree.clone()));
            }
        }
        for refresher in &delta.refreshers {
            for (offset, tree) in (0..).zip(&refresher.trees) {
                self.detached
                    .entry(refresher.id.offset(offset))
                    .or_insert_with(|| Node::leaf(tree.clone()));
            }
        }

        let mut applier = Applier {
            detached: &mut self.detached,
            globals: Vec::new(),
            renames: Vec::new(),
        };
        applier.detach_fields(&mut self.root, &delta.fields)?;
        for (id, nested) in std::mem::take(&mut applier.globals) {
            if let Some(mut node) = applier.detached.remove(&id) {
                applier.apply_fields(&mut node.fields, &nested)?;
                applier.detached.insert(id, node);
            }
        }
        for rename in std::mem::take(&mut applier.renames) {
            for offset in 0..rename.count {
                if let Some(node) = applier.detached.remove(&rename.old_id.offset(offset)) {
                    applier.stash(rename.new_id.offset(offset), node)?;
                }
            }
        }
        applier.attach_fields(&mut self.root, &delta.fields)?;

        for destruction in &delta.destroy {
            for offset in 0..destruction.count {
                self.detached.remove(&destruction.id.offset(offset));
            }
        }
        Ok(())
    }
}

struct Applier<'a> {
    detached: &'a mut BTreeMap<ChangeAtomId, Node>,
    globals: Vec<(ChangeAtomId, DeltaFieldMap)>,
    renames: Vec<DeltaDetachedNodeRename>,
}

impl Applier<'_> {
    fn stash(&mut self, id: ChangeAtomId, node: Node) -> Result<(), String> {
        match self.detached.insert(id, node) {
            Some(previous) => Err(format!("two nodes detached as {id}, one was {:?}", previous.value)),
            None => Ok(()),
        }
    }

    fn take(&mut self, id: ChangeAtomId) -> Result<Node, String> {
        self.detached
            .remove(&id)
            .ok_or_else(|| format!("nothing detached as {id}"))
    }

    fn apply_fields(&mut self, fields: &mut Fields, delta: &DeltaFieldMap) -> Result<(), String> {
        self.detach_fields(fields, delta)?;
        self.attach_fields(fields, delta)
    }

    fn detach_fields(&mut self, fields: &mut Fields, delta: &DeltaFieldMap) -> Result<(), String> {
        for (key, changes) in delta {
            self.globals
                .extend(changes.global.iter().map(|global| (global.id, global.fields.clone())));
            self.renames.extend(changes.rename.iter().cloned());
            let nodes = fields.entry(key.clone()).or_default();
            let mut index = 0;
            for mark in &changes.local {
                match (mark.attach, mark.detach) {
                    (_, Some(detach)) => {
                        for offset in 0..mark.count {
                            if index >= nodes.len() {
                                return Err(format!("detach past the end of {key}"));
                            }
                            let mut node = nodes.remove(index);
                            if let Some(nested) = &mark.fields {
                                self.apply_fields(&mut node.fields, nested)?;
                            }
                            self.stash(detach.offset(offset), node)?;
                        }
                    }
                    (Some(_), None) => {}
                    (None, None) => {
                        if let Some(nested) = &mark.fields {
                            for at in index..index + mark.count as usize {
                                let node = nodes
                                    .get_mut(at)
                                    .ok_or_else(|| format!("no node {at} in {key}"))?;
                                self.detach_fields(&mut node.fields, nested)?;
                            }
                        }
                        index += mark.count as usize;
                    }
                }
            }
        }
        Ok(())
    }

    fn attach_fields(&mut self, fields: &mut Fields, delta: &DeltaFieldMap) -> Result<(), String> {
        for (key, changes) in delta {
            let nodes = fields.entry(key.clone()).or_default();
            let mut index = 0;
            for mark in &changes.local {
                match (mark.attach, mark.detach) {
                    (Some(attach), _) => {
                        for offset in 0..mark.count {
                            if index > nodes.len() {
                                return Err(format!("attach past the end of {key}"));
                            }
                            nodes.insert(index, self.take(attach.offset(offset))?);
                            index += 1;
                        }
                    }
                    (None, Some(_)) => {}
                    (None, None) => {
                        if let Some(nested) = &mark.fields {
                            for at in index..index + mark.count as usize {
                                let node = nodes
                                    .get_mut(at)
                                    .ok_or_else(|| format!("no node {at} in {key}"))?;
                                self.attach_fields(&mut node.fields, nested)?;
                            }
                        }
                        index += mark.count as usize;
                    }
                }
            }
        }
        Ok(())
    }
}
