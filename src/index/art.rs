use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::{
  data::log_record::LogRecordPos,
  errors::Result,
  option::IteratorOptions,
};

use super::{IndexIterator, Indexer};

/// Adaptive radix tree index.
///
/// Edges are path-compressed: each node carries the byte run leading to it,
/// and children are kept sorted by their first edge byte so a plain DFS walks
/// the keys in byte-lexicographic order. The child table starts tiny and
/// grows with the fan-out, which keeps sparse interior nodes cheap.
pub struct AdaptiveRadixTree {
  root: Arc<RwLock<Node>>,
  len: AtomicUsize,
}

struct Node {
  /// Compressed edge bytes from the parent; empty for the root.
  prefix: Vec<u8>,
  pos: Option<LogRecordPos>,
  /// Sorted by edge byte; the edge byte equals `child.prefix[0]`.
  children: Vec<(u8, Box<Node>)>,
}

impl Node {
  fn leaf(prefix: Vec<u8>, pos: LogRecordPos) -> Box<Node> {
    Box::new(Node {
      prefix,
      pos: Some(pos),
      children: Vec::new(),
    })
  }
}

impl AdaptiveRadixTree {
  pub fn new() -> Self {
    Self {
      root: Arc::new(RwLock::new(Node {
        prefix: Vec::new(),
        pos: None,
        children: Vec::new(),
      })),
      len: AtomicUsize::new(0),
    }
  }
}

impl Default for AdaptiveRadixTree {
  fn default() -> Self {
    Self::new()
  }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
  a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

fn insert(node: &mut Node, key: &[u8], pos: LogRecordPos) -> Option<LogRecordPos> {
  let common = common_prefix_len(&node.prefix, key);

  if common < node.prefix.len() {
    // the key diverges inside this compressed edge: split it
    let tail = node.prefix.split_off(common);
    let split_child = Node {
      prefix: tail,
      pos: node.pos.take(),
      children: std::mem::take(&mut node.children),
    };
    node
      .children
      .push((split_child.prefix[0], Box::new(split_child)));

    if key.len() == common {
      node.pos = Some(pos);
    } else {
      let rest = &key[common..];
      let leaf = Node::leaf(rest.to_vec(), pos);
      match node.children.binary_search_by_key(&rest[0], |(e, _)| *e) {
        Ok(_) => unreachable!("split produced a duplicate edge byte"),
        Err(i) => node.children.insert(i, (rest[0], leaf)),
      }
    }
    return None;
  }

  if key.len() == node.prefix.len() {
    return node.pos.replace(pos);
  }

  let rest = &key[node.prefix.len()..];
  match node.children.binary_search_by_key(&rest[0], |(e, _)| *e) {
    Ok(i) => insert(&mut node.children[i].1, rest, pos),
    Err(i) => {
      node
        .children
        .insert(i, (rest[0], Node::leaf(rest.to_vec(), pos)));
      None
    }
  }
}

fn find(node: &Node, key: &[u8]) -> Option<LogRecordPos> {
  if !key.starts_with(&node.prefix) {
    return None;
  }
  if key.len() == node.prefix.len() {
    return node.pos;
  }
  let rest = &key[node.prefix.len()..];
  let i = node
    .children
    .binary_search_by_key(&rest[0], |(e, _)| *e)
    .ok()?;
  find(&node.children[i].1, rest)
}

fn remove(node: &mut Node, key: &[u8]) -> Option<LogRecordPos> {
  if !key.starts_with(&node.prefix) {
    return None;
  }
  if key.len() == node.prefix.len() {
    return node.pos.take();
  }
  let rest = &key[node.prefix.len()..];
  let i = node
    .children
    .binary_search_by_key(&rest[0], |(e, _)| *e)
    .ok()?;
  let old = remove(&mut node.children[i].1, rest)?;

  let child = &mut node.children[i].1;
  if child.pos.is_none() && child.children.is_empty() {
    node.children.remove(i);
  } else if child.pos.is_none() && child.children.len() == 1 {
    // re-compress a pass-through node left behind by the removal
    let (_, grandchild) = child.children.pop().expect("child has one entry");
    let mut merged = std::mem::take(&mut child.prefix);
    merged.extend_from_slice(&grandchild.prefix);
    **child = *grandchild;
    child.prefix = merged;
  }
  Some(old)
}

fn collect(node: &Node, buf: &mut Vec<u8>, items: &mut Vec<(Vec<u8>, LogRecordPos)>) {
  buf.extend_from_slice(&node.prefix);
  if let Some(pos) = node.pos {
    items.push((buf.clone(), pos));
  }
  for (_, child) in node.children.iter() {
    collect(child, buf, items);
  }
  buf.truncate(buf.len() - node.prefix.len());
}

impl Indexer for AdaptiveRadixTree {
  fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Option<LogRecordPos> {
    let mut root = self.root.write();
    let old = insert(&mut root, &key, pos);
    if old.is_none() {
      self.len.fetch_add(1, Ordering::SeqCst);
    }
    old
  }

  fn get(&self, key: Vec<u8>) -> Option<LogRecordPos> {
    let root = self.root.read();
    find(&root, &key)
  }

  fn delete(&self, key: Vec<u8>) -> Option<LogRecordPos> {
    let mut root = self.root.write();
    let old = remove(&mut root, &key);
    if old.is_some() {
      self.len.fetch_sub(1, Ordering::SeqCst);
    }
    old
  }

  fn size(&self) -> usize {
    self.len.load(Ordering::SeqCst)
  }

  fn list_keys(&self) -> Result<Vec<Bytes>> {
    let root = self.root.read();
    let mut items = Vec::with_capacity(self.size());
    collect(&root, &mut Vec::new(), &mut items);
    Ok(
      items
        .into_iter()
        .map(|(key, _)| Bytes::from(key))
        .collect(),
    )
  }

  fn iterator(&self, options: IteratorOptions) -> Box<dyn IndexIterator> {
    let root = self.root.read();
    let mut items = Vec::with_capacity(self.size());
    collect(&root, &mut Vec::new(), &mut items);
    if options.reverse {
      items.reverse();
    }

    Box::new(ArtIterator {
      items,
      curr_index: 0,
      options,
    })
  }

  fn close(&self) -> Result<()> {
    Ok(())
  }
}

pub struct ArtIterator {
  items: Vec<(Vec<u8>, LogRecordPos)>,
  curr_index: usize,
  options: IteratorOptions,
}

impl IndexIterator for ArtIterator {
  fn rewind(&mut self) {
    self.curr_index = 0;
  }

  fn seek(&mut self, key: Vec<u8>) {
    self.curr_index = match self.items.binary_search_by(|(x, _)| {
      if self.options.reverse {
        x.cmp(&key).reverse()
      } else {
        x.cmp(&key)
      }
    }) {
      Ok(equal_val) => equal_val,
      Err(insert_val) => insert_val,
    };
  }

  fn next(&mut self) -> Option<(&Vec<u8>, &LogRecordPos)> {
    while self.curr_index < self.items.len() {
      let i = self.curr_index;
      self.curr_index += 1;
      let (key, pos) = &self.items[i];
      if self.options.prefix.is_empty() || key.starts_with(&self.options.prefix) {
        return Some((key, pos));
      }
    }
    None
  }
}
