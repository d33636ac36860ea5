//! Live field trees.
//!
//! An [`Instance`] is an arena of nodes manufactured from a prototype tree.
//! Composites own their children through arena indices; the parent link is an
//! index too, used only for upward name resolution, never for ownership.
//! Detached nodes (popped array elements, replaced choice state) simply
//! become unreachable; the arena is append-only.

use std::io::{Read, Write};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::errors::{Error, Result};
use crate::expr::eval_plain;
use crate::proto::{FieldDecl, Kind, Prototype};
use crate::stream::{BitReader, BitWriter};
use crate::value::Value;

/// Index of a node within its instance arena.
pub type NodeId = usize;

#[derive(Debug)]
pub(crate) enum NodeData {
    Prim { value: Option<Value> },
    Record { children: Vec<NodeId> },
    Array { children: Vec<NodeId> },
    Choice { selected: Option<usize>, children: Vec<NodeId> },
}

#[derive(Debug)]
pub(crate) struct Node {
    pub proto: Arc<Prototype>,
    pub parent: Option<NodeId>,
    pub data: NodeData,
}

/// A live, mutable field tree produced by [`crate::Schema::instantiate`].
#[derive(Debug)]
pub struct Instance {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Instance {
    pub(crate) fn from_proto(proto: &Arc<Prototype>) -> Self {
        let mut inst = Instance {
            nodes: Vec::new(),
            root: 0,
        };
        inst.root = inst.add(proto, None);
        inst
    }

    fn add(&mut self, proto: &Arc<Prototype>, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        let data = match &proto.kind {
            Kind::Record(_) => NodeData::Record { children: Vec::new() },
            Kind::Array(_) => NodeData::Array { children: Vec::new() },
            Kind::Choice(_) => NodeData::Choice {
                selected: None,
                children: Vec::new(),
            },
            _ => NodeData::Prim { value: None },
        };
        self.nodes.push(Node {
            proto: Arc::clone(proto),
            parent,
            data,
        });

        let proto = Arc::clone(&self.nodes[id].proto);
        match &proto.kind {
            Kind::Record(spec) => {
                let mut children = Vec::with_capacity(spec.fields.len());
                for decl in &spec.fields {
                    children.push(self.add(&decl.proto, Some(id)));
                }
                if let NodeData::Record { children: c } = &mut self.nodes[id].data {
                    *c = children;
                }
            }
            Kind::Choice(spec) => {
                let mut children = Vec::with_capacity(spec.alternatives.len());
                for (_, alt) in &spec.alternatives {
                    children.push(self.add(alt, Some(id)));
                }
                if let NodeData::Choice { children: c, .. } = &mut self.nodes[id].data {
                    *c = children;
                }
            }
            _ => {}
        }

        id
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    pub fn root(&self) -> FieldRef<'_> {
        FieldRef {
            inst: self,
            id: self.root,
        }
    }

    pub fn root_mut(&mut self) -> FieldMut<'_> {
        let id = self.root;
        FieldMut { inst: self, id }
    }

    // ---- tree accessors -------------------------------------------------

    pub(crate) fn proto(&self, id: NodeId) -> &Arc<Prototype> {
        &self.nodes[id].proto
    }

    pub(crate) fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    /// Named child lookup. Records resolve their declared names (hidden ones
    /// included); choices delegate to the alternative they last switched to.
    /// The stored index is used here, not the selection expression, so that
    /// evaluating a selection which resolves sibling names cannot re-enter
    /// this lookup.
    pub(crate) fn child_by_name(&self, id: NodeId, name: &str) -> Option<NodeId> {
        match (&self.proto(id).kind, &self.nodes[id].data) {
            (Kind::Record(spec), NodeData::Record { children }) => spec
                .fields
                .iter()
                .position(|d| d.name.as_deref() == Some(name))
                .map(|i| children[i]),
            (Kind::Choice(_), NodeData::Choice { selected, children }) => selected
                .map(|i| children[i])
                .and_then(|c| self.child_by_name(c, name)),
            _ => None,
        }
    }

    /// Position of `id` within its parent array, if the parent is one.
    pub(crate) fn array_index_of(&self, id: NodeId) -> Option<usize> {
        let parent = self.nodes[id].parent?;
        match &self.nodes[parent].data {
            NodeData::Array { children } => children.iter().position(|&c| c == id),
            _ => None,
        }
    }

    /// Value seen by the evaluator: primitives yield their current value,
    /// composites their snapshot.
    pub(crate) fn value_of(&self, id: NodeId) -> Result<Value> {
        if self.proto(id).is_composite() {
            self.snapshot_node(id)
        } else {
            self.current_value(id)
        }
    }

    /// Current value of a primitive: a computed `value` expression wins,
    /// then the last assignment or read, then `initial_value`, then the
    /// kind's default.
    pub(crate) fn current_value(&self, id: NodeId) -> Result<Value> {
        let proto = self.proto(id);
        if let Some(expr) = proto.params.get("value") {
            return eval_plain(self, id, expr);
        }
        if let NodeData::Prim { value: Some(v) } = &self.nodes[id].data {
            return Ok(v.clone());
        }
        if let Some(expr) = proto.params.get("initial_value") {
            return eval_plain(self, id, expr);
        }
        Ok(proto.default_value())
    }

    /// Stores a materialized value on a primitive without the computed-field
    /// assignment guard. Used by the read path.
    pub(crate) fn set_prim(&mut self, id: NodeId, v: Value) {
        if let NodeData::Prim { value } = &mut self.nodes[id].data {
            *value = Some(v);
        }
    }

    // ---- choice ---------------------------------------------------------

    fn choice_pick_index(&self, id: NodeId) -> Result<usize> {
        let spec = match &self.proto(id).kind {
            Kind::Choice(spec) => spec,
            _ => return Err(Error::InvalidAssignment("not a choice".to_string())),
        };
        let key = eval_plain(self, id, &spec.selection)?;
        spec.alternatives
            .iter()
            .position(|(k, _)| k.eq_loose(&key))
            .ok_or_else(|| Error::NoAlternative(key.to_string()))
    }

    /// Alternative the selection currently evaluates to, plus whether a
    /// switch is still pending (the stored index differs).
    fn choice_view(&self, id: NodeId) -> Result<(NodeId, bool)> {
        let idx = self.choice_pick_index(id)?;
        match &self.nodes[id].data {
            NodeData::Choice { selected, children } => {
                Ok((children[idx], *selected != Some(idx)))
            }
            _ => unreachable!("choice node data"),
        }
    }

    /// Currently selected alternative, without switching state.
    pub(crate) fn choice_selected(&self, id: NodeId) -> Result<NodeId> {
        self.choice_view(id).map(|(child, _)| child)
    }

    /// Evaluates the selection and switches to it, dropping the previous
    /// alternative's state so the new one starts fresh.
    pub(crate) fn choice_switch(&mut self, id: NodeId) -> Result<NodeId> {
        let idx = self.choice_pick_index(id)?;
        let (child, stale) = match &self.nodes[id].data {
            NodeData::Choice { selected, children } => (children[idx], *selected != Some(idx)),
            _ => unreachable!("choice node data"),
        };
        if stale {
            self.clear_node(child);
            if let NodeData::Choice { selected, .. } = &mut self.nodes[id].data {
                *selected = Some(idx);
            }
        }
        Ok(child)
    }

    // ---- array ----------------------------------------------------------

    pub(crate) fn array_len(&self, id: NodeId) -> usize {
        match &self.nodes[id].data {
            NodeData::Array { children } => children.len(),
            _ => 0,
        }
    }

    pub(crate) fn array_child(&self, id: NodeId, i: usize) -> Option<NodeId> {
        match &self.nodes[id].data {
            NodeData::Array { children } => children.get(i).copied(),
            _ => None,
        }
    }

    /// Appends one default-constructed element.
    pub(crate) fn array_push(&mut self, id: NodeId) -> Result<NodeId> {
        let element = match &self.proto(id).kind {
            Kind::Array(spec) => Arc::clone(&spec.element),
            _ => return Err(Error::InvalidAssignment("not an array".to_string())),
        };
        let child = self.add(&element, Some(id));
        if let NodeData::Array { children } = &mut self.nodes[id].data {
            children.push(child);
        }
        Ok(child)
    }

    pub(crate) fn array_pop(&mut self, id: NodeId) {
        if let NodeData::Array { children } = &mut self.nodes[id].data {
            children.pop();
        }
    }

    pub(crate) fn array_clear(&mut self, id: NodeId) {
        if let NodeData::Array { children } = &mut self.nodes[id].data {
            children.clear();
        }
    }

    /// Grows the array with default elements until it holds `n` of them.
    pub(crate) fn array_extend_to(&mut self, id: NodeId, n: usize) -> Result<()> {
        while self.array_len(id) < n {
            self.array_push(id)?;
        }
        Ok(())
    }

    // ---- record ---------------------------------------------------------

    pub(crate) fn record_decls(&self, id: NodeId) -> &[FieldDecl] {
        match &self.proto(id).kind {
            Kind::Record(spec) => &spec.fields,
            _ => &[],
        }
    }

    pub(crate) fn record_children(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id].data {
            NodeData::Record { children } => children,
            _ => &[],
        }
    }

    fn record_hidden(&self, id: NodeId, name: &str) -> bool {
        match &self.proto(id).kind {
            Kind::Record(spec) => spec.hide.iter().any(|h| h == name),
            _ => false,
        }
    }

    // ---- whole-tree operations ------------------------------------------

    /// Parses the tree from a byte source, positioned at its start.
    pub fn read<R: Read>(&mut self, reader: R) -> Result<()> {
        let mut stream = BitReader::new(reader);
        self.read_from(&mut stream)
    }

    /// Parses the tree from an existing bit stream, continuing at its cursor.
    pub fn read_from<R: Read>(&mut self, stream: &mut BitReader<R>) -> Result<()> {
        crate::read::read_node(self, self.root, stream, "")
    }

    /// Serializes the tree, flushing any trailing partial byte zero-padded.
    pub fn write<W: Write>(&mut self, writer: W) -> Result<()> {
        let mut stream = BitWriter::new(writer);
        self.write_to(&mut stream)?;
        stream.flush()
    }

    /// Serializes into an existing bit stream. The caller keeps ownership of
    /// the pending bit buffer and is responsible for the final flush.
    pub fn write_to<W: Write>(&mut self, stream: &mut BitWriter<W>) -> Result<()> {
        crate::write::write_node(self, self.root, stream, "")
    }

    /// Serializes the tree to a fresh byte vector.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write(&mut out)?;
        Ok(out)
    }

    /// Serialized size in whole bytes, bit runs rounded up at byte-aligned
    /// fields and at the end.
    pub fn num_bytes(&self) -> Result<u64> {
        let bits = crate::write::num_bits_node(self, self.root, 0)?;
        Ok((bits + 7) / 8)
    }

    pub fn snapshot(&self) -> Result<Value> {
        self.snapshot_node(self.root)
    }

    pub fn assign(&mut self, v: impl Into<Value>) -> Result<()> {
        self.assign_node(self.root, v.into())
    }

    pub fn clear(&mut self) {
        self.clear_node(self.root);
    }

    pub fn is_clear(&self) -> bool {
        self.is_clear_node(self.root)
    }

    pub(crate) fn snapshot_node(&self, id: NodeId) -> Result<Value> {
        match &self.nodes[id].data {
            NodeData::Prim { .. } => self.current_value(id),
            NodeData::Record { children } => {
                let mut map = IndexMap::new();
                for (decl, &child) in self.record_decls(id).iter().zip(children) {
                    let name = match &decl.name {
                        Some(n) if !self.record_hidden(id, n) => n.clone(),
                        _ => continue,
                    };
                    map.insert(name, self.snapshot_node(child)?);
                }
                Ok(Value::Map(map))
            }
            NodeData::Array { children } => {
                let mut list = Vec::with_capacity(children.len());
                for &child in children {
                    list.push(self.snapshot_node(child)?);
                }
                Ok(Value::List(list))
            }
            NodeData::Choice { .. } => {
                let (child, fresh) = self.choice_view(id)?;
                // a pending switch presents the alternative in its fresh
                // state; the actual clearing happens at the next mutation
                if fresh {
                    self.clean_snapshot(child)
                } else {
                    self.snapshot_node(child)
                }
            }
        }
    }

    /// Snapshot of a node as if it had just been cleared.
    fn clean_snapshot(&self, id: NodeId) -> Result<Value> {
        let proto = self.proto(id);
        match &proto.kind {
            Kind::Record(_) => {
                let mut map = IndexMap::new();
                let children = self.record_children(id).to_vec();
                for (decl, child) in self.record_decls(id).iter().zip(children) {
                    let name = match &decl.name {
                        Some(n) if !self.record_hidden(id, n) => n.clone(),
                        _ => continue,
                    };
                    map.insert(name, self.clean_snapshot(child)?);
                }
                Ok(Value::Map(map))
            }
            Kind::Array(_) => Ok(Value::List(Vec::new())),
            Kind::Choice(_) => {
                let (child, _) = self.choice_view(id)?;
                self.clean_snapshot(child)
            }
            _ => {
                if let Some(expr) = proto.params.get("value") {
                    return eval_plain(self, id, expr);
                }
                if let Some(expr) = proto.params.get("initial_value") {
                    return eval_plain(self, id, expr);
                }
                Ok(proto.default_value())
            }
        }
    }

    pub(crate) fn assign_node(&mut self, id: NodeId, v: Value) -> Result<()> {
        if v.is_null() {
            self.clear_node(id);
            return Ok(());
        }

        match &self.proto(id).kind {
            Kind::Record(_) => {
                let map = match v {
                    Value::Map(m) => m,
                    other => {
                        return Err(Error::InvalidAssignment(format!(
                            "record expects a mapping, got {}",
                            other
                        )))
                    }
                };
                self.clear_node(id);
                for (name, val) in map {
                    let child = self.child_by_name(id, &name).ok_or_else(|| {
                        Error::InvalidAssignment(format!("no field named {}", name))
                    })?;
                    self.assign_node(child, val)?;
                }
                Ok(())
            }
            Kind::Array(_) => {
                let list = match v {
                    Value::List(xs) => xs,
                    other => {
                        return Err(Error::InvalidAssignment(format!(
                            "array expects a list, got {}",
                            other
                        )))
                    }
                };
                self.array_clear(id);
                for val in list {
                    let child = self.array_push(id)?;
                    self.assign_node(child, val)?;
                }
                Ok(())
            }
            Kind::Choice(_) => {
                let child = self.choice_switch(id)?;
                self.assign_node(child, v)
            }
            _ => self.assign_prim(id, v),
        }
    }

    fn assign_prim(&mut self, id: NodeId, v: Value) -> Result<()> {
        let proto = self.proto(id);
        if proto.params.contains("value") {
            return Err(Error::InvalidAssignment(
                "field value is computed".to_string(),
            ));
        }

        let stored = match &proto.kind {
            Kind::Int { signed: true, .. } => Value::Int(v.as_i64().ok_or_else(|| {
                Error::InvalidAssignment(format!("expected integer, got {}", v))
            })?),
            Kind::Int { signed: false, .. } => Value::UInt(v.as_u64().ok_or_else(|| {
                Error::InvalidAssignment(format!("expected unsigned integer, got {}", v))
            })?),
            Kind::Float { .. } => Value::Float(v.as_f64().ok_or_else(|| {
                Error::InvalidAssignment(format!("expected number, got {}", v))
            })?),
            Kind::Str | Kind::StrZ => match v {
                Value::Str(_) | Value::Bytes(_) => v,
                other => {
                    return Err(Error::InvalidAssignment(format!(
                        "expected text or bytes, got {}",
                        other
                    )))
                }
            },
            Kind::Rest => match v {
                Value::Bytes(_) => v,
                Value::Str(s) => Value::Bytes(s.into_bytes()),
                other => {
                    return Err(Error::InvalidAssignment(format!(
                        "expected bytes, got {}",
                        other
                    )))
                }
            },
            Kind::ResumeAlignment => {
                return Err(Error::InvalidAssignment(
                    "alignment directives hold no value".to_string(),
                ))
            }
            Kind::Record(_) | Kind::Array(_) | Kind::Choice(_) => unreachable!("composite"),
        };

        self.set_prim(id, stored);
        Ok(())
    }

    pub(crate) fn clear_node(&mut self, id: NodeId) {
        let kids: Vec<NodeId> = match &mut self.nodes[id].data {
            NodeData::Prim { value } => {
                *value = None;
                return;
            }
            NodeData::Array { children } => {
                children.clear();
                return;
            }
            NodeData::Record { children } => children.clone(),
            NodeData::Choice { selected, children } => {
                *selected = None;
                children.clone()
            }
        };
        for child in kids {
            self.clear_node(child);
        }
    }

    pub(crate) fn is_clear_node(&self, id: NodeId) -> bool {
        match &self.nodes[id].data {
            NodeData::Prim { value } => value.is_none(),
            NodeData::Record { children } => {
                children.iter().all(|&c| self.is_clear_node(c))
            }
            NodeData::Array { children } => children.is_empty(),
            NodeData::Choice { selected, children } => {
                selected.is_none() && children.iter().all(|&c| self.is_clear_node(c))
            }
        }
    }
}

/// Borrowed view of one node, for navigation and inspection.
#[derive(Clone, Copy)]
pub struct FieldRef<'a> {
    inst: &'a Instance,
    id: NodeId,
}

impl<'a> FieldRef<'a> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Named child of a record (hidden fields included) or of the selected
    /// choice alternative.
    pub fn field(&self, name: &str) -> Result<FieldRef<'a>> {
        let id = self
            .inst
            .child_by_name(self.id, name)
            .ok_or_else(|| Error::UnresolvedName(name.to_string()))?;
        Ok(FieldRef { inst: self.inst, id })
    }

    /// Positional child. Arrays do not auto-extend through this view.
    pub fn at(&self, i: usize) -> Result<FieldRef<'a>> {
        let id = match &self.inst.nodes[self.id].data {
            NodeData::Array { children } => children.get(i).copied(),
            NodeData::Record { children } => children.get(i).copied(),
            _ => None,
        }
        .ok_or_else(|| Error::UnresolvedName(format!("index {}", i)))?;
        Ok(FieldRef { inst: self.inst, id })
    }

    pub fn len(&self) -> usize {
        match &self.inst.nodes[self.id].data {
            NodeData::Array { children } | NodeData::Record { children } => children.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current value for primitives, snapshot for composites.
    pub fn value(&self) -> Result<Value> {
        self.inst.value_of(self.id)
    }

    pub fn snapshot(&self) -> Result<Value> {
        self.inst.snapshot_node(self.id)
    }

    /// Serialized size of this subtree in whole bytes, taken from a byte
    /// boundary.
    pub fn num_bytes(&self) -> Result<u64> {
        let bits = crate::write::num_bits_node(self.inst, self.id, 0)?;
        Ok((bits + 7) / 8)
    }

    /// Declared names visible to iteration: anonymous and hidden fields are
    /// omitted.
    pub fn field_names(&self) -> Vec<&'a str> {
        self.inst
            .record_decls(self.id)
            .iter()
            .filter_map(|d| d.name.as_deref())
            .filter(|n| !self.inst.record_hidden(self.id, n))
            .collect()
    }

    /// True for any declared name, hidden ones included.
    pub fn has_field(&self, name: &str) -> bool {
        self.inst
            .record_decls(self.id)
            .iter()
            .any(|d| d.name.as_deref() == Some(name))
    }

    pub fn is_clear(&self) -> bool {
        self.inst.is_clear_node(self.id)
    }
}

/// Mutable view of one node. Navigation consumes the view, so chains like
/// `root_mut().field("a")?.set(1)` move ownership stepwise.
pub struct FieldMut<'a> {
    inst: &'a mut Instance,
    id: NodeId,
}

impl<'a> FieldMut<'a> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn field(self, name: &str) -> Result<FieldMut<'a>> {
        let id = match &self.inst.proto(self.id).kind {
            Kind::Choice(_) => {
                let child = self.inst.choice_switch(self.id)?;
                self.inst.child_by_name(child, name)
            }
            _ => self.inst.child_by_name(self.id, name),
        }
        .ok_or_else(|| Error::UnresolvedName(name.to_string()))?;
        Ok(FieldMut { inst: self.inst, id })
    }

    /// Positional child. Indexing an array at or past its length grows it
    /// with default elements first.
    pub fn at(self, i: usize) -> Result<FieldMut<'a>> {
        let id = match &self.inst.nodes[self.id].data {
            NodeData::Array { .. } => {
                self.inst.array_extend_to(self.id, i + 1)?;
                self.inst.array_child(self.id, i)
            }
            NodeData::Record { children } => children.get(i).copied(),
            _ => None,
        }
        .ok_or_else(|| Error::UnresolvedName(format!("index {}", i)))?;
        Ok(FieldMut { inst: self.inst, id })
    }

    /// The selected alternative of a choice, switching if the selection
    /// changed.
    pub fn selected(self) -> Result<FieldMut<'a>> {
        let id = self.inst.choice_switch(self.id)?;
        Ok(FieldMut { inst: self.inst, id })
    }

    pub fn set(self, v: impl Into<Value>) -> Result<()> {
        self.inst.assign_node(self.id, v.into())
    }

    pub fn clear(self) {
        self.inst.clear_node(self.id);
    }

    /// Appends one element to an array and assigns it.
    pub fn push(self, v: impl Into<Value>) -> Result<()> {
        let child = self.inst.array_push(self.id)?;
        self.inst.assign_node(child, v.into())
    }

    /// Splices values in at `i`, growing the array with defaults up to `i`
    /// first.
    pub fn insert(self, i: usize, values: Vec<Value>) -> Result<()> {
        self.inst.array_extend_to(self.id, i)?;
        let mut ids = Vec::with_capacity(values.len());
        for v in values {
            let child = self.inst.array_push(self.id)?;
            self.inst.assign_node(child, v)?;
            ids.push(child);
        }
        // move the freshly appended ids into place
        if let NodeData::Array { children } = &mut self.inst.nodes[self.id].data {
            let n = ids.len();
            let len = children.len();
            children.truncate(len - n);
            for (k, id) in ids.into_iter().enumerate() {
                children.insert(i + k, id);
            }
        }
        Ok(())
    }
}
