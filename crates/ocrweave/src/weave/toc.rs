//! Table-of-contents repair after page replacement.
//!
//! Replacing a page gives it a new object id, invalidating any outline
//! entries that point at the old one. The outline tree is walked as a plain
//! graph (it can accidentally contain cycles), and every `/Dest` or
//! `/A /GoTo /D` destination still aiming at a replaced page is rewritten.

use std::collections::{HashMap, HashSet};

use lopdf::{Document, Object, ObjectId};
use tracing::debug;

use crate::error::Result;

const LINK_KEYS: [&[u8]; 5] = [b"Parent", b"First", b"Last", b"Prev", b"Next"];

/// Rewrite outline destinations according to `page_remap`
/// (old page id -> new page id).
pub fn fix_toc(doc: &mut Document, page_remap: &HashMap<ObjectId, ObjectId>) -> Result<()> {
    if page_remap.is_empty() {
        return Ok(());
    }
    let nodes = collect_outline_nodes(doc);
    for node_id in nodes {
        rewrite_node(doc, node_id, page_remap);
    }
    Ok(())
}

/// Gather every reachable outline node once, cycle-safe.
fn collect_outline_nodes(doc: &Document) -> Vec<ObjectId> {
    let mut visited: HashSet<ObjectId> = HashSet::new();
    let mut queue: Vec<ObjectId> = Vec::new();

    let root = doc
        .catalog()
        .ok()
        .and_then(|catalog| catalog.get(b"Outlines").ok())
        .and_then(|obj| obj.as_reference().ok());
    let Some(root) = root else {
        return Vec::new();
    };
    queue.push(root);

    let mut order = Vec::new();
    while let Some(objgen) = queue.pop() {
        if !visited.insert(objgen) {
            continue;
        }
        debug!("fix toc: exploring outline entries at {objgen:?}");
        order.push(objgen);
        let Ok(node) = doc.get_dictionary(objgen) else {
            continue;
        };
        for key in LINK_KEYS {
            let Ok(item) = node.get(key) else { continue };
            // Direct references are not allowed here; it is not clear what
            // we should do if we find any, so they are skipped.
            let Ok(next) = item.as_reference() else {
                continue;
            };
            if !visited.contains(&next) {
                queue.push(next);
            }
        }
    }
    order
}

fn rewrite_node(doc: &mut Document, node_id: ObjectId, page_remap: &HashMap<ObjectId, ObjectId>) {
    // Find where the destination array lives: directly under /Dest, or under
    // /A /D when the action is a GoTo. The action dictionary itself may be
    // direct or indirect.
    enum Target {
        Dest,
        ActionDirect,
        ActionIndirect(ObjectId),
    }

    let target = {
        let Ok(node) = doc.get_dictionary(node_id) else {
            return;
        };
        if node.has(b"Dest") {
            Some(Target::Dest)
        } else if let Ok(action) = node.get(b"A") {
            match action {
                Object::Dictionary(dict) if is_goto(dict) => Some(Target::ActionDirect),
                Object::Reference(action_id) => match doc.get_dictionary(*action_id) {
                    Ok(dict) if is_goto(dict) => Some(Target::ActionIndirect(*action_id)),
                    _ => None,
                },
                _ => None,
            }
        } else {
            None
        }
    };

    match target {
        Some(Target::Dest) => {
            if let Ok(node) = doc.get_dictionary_mut(node_id) {
                if let Ok(dest) = node.get_mut(b"Dest") {
                    remap_dest(dest, page_remap);
                }
            }
        }
        Some(Target::ActionDirect) => {
            if let Ok(node) = doc.get_dictionary_mut(node_id) {
                if let Ok(Object::Dictionary(action)) = node.get_mut(b"A") {
                    if let Ok(dest) = action.get_mut(b"D") {
                        remap_dest(dest, page_remap);
                    }
                }
            }
        }
        Some(Target::ActionIndirect(action_id)) => {
            if let Ok(action) = doc.get_dictionary_mut(action_id) {
                if let Ok(dest) = action.get_mut(b"D") {
                    remap_dest(dest, page_remap);
                }
            }
        }
        None => {}
    }
}

fn is_goto(action: &lopdf::Dictionary) -> bool {
    action
        .get(b"S")
        .ok()
        .and_then(|s| s.as_name().ok())
        .map_or(false, |name| name == b"GoTo")
}

/// A destination is an array whose first element references the target page.
fn remap_dest(dest: &mut Object, page_remap: &HashMap<ObjectId, ObjectId>) {
    let Object::Array(items) = dest else {
        // Named destinations and other forms are left alone.
        return;
    };
    let Some(first) = items.first_mut() else {
        return;
    };
    if let Object::Reference(id) = first {
        if let Some(new_id) = page_remap.get(id) {
            *first = Object::Reference(*new_id);
        }
    }
}
