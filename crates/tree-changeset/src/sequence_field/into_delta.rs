//! Delta conversion and the detached content a mark list depends on.

use crate::delta::{
    DeltaDetachedNodeChanges, DeltaDetachedNodeRename, DeltaFieldChanges, DeltaMark,
    DetachedNodeId,
};
use crate::error::Result;
use crate::field_kinds::{ChildDelta, ChildRemovedRoots};

use super::format::{Attach, Mark, MarkEffect};
use super::utils::attach_source;

pub(super) fn into_delta(change: &[Mark], child_delta: ChildDelta<'_>) -> Result<DeltaFieldChanges> {
    let mut delta = DeltaFieldChanges::default();
    for mark in change {
        let fields = match mark.changes {
            Some(node) => Some(child_delta(node)?).filter(|f| !f.is_empty()),
            None => None,
        };
        match &mark.effect {
            MarkEffect::Noop => match &mark.cell_id {
                None => delta.push_mark(DeltaMark {
                    count: mark.count,
                    attach: None,
                    detach: None,
                    fields,
                }),
                Some(cell) => {
                    if let Some(fields) = fields {
                        delta.global.push(DeltaDetachedNodeChanges {
                            id: cell.atom(),
                            fields,
                        });
                    }
                }
            },
            MarkEffect::Attach(attach) => {
                let source = attach_source(attach, mark.cell_id.as_ref());
                if let Some(fields) = fields {
                    delta.global.push(DeltaDetachedNodeChanges { id: source, fields });
                }
                delta.push_mark(DeltaMark {
                    count: mark.count,
                    attach: Some(source),
                    detach: None,
                    fields: None,
                });
            }
            MarkEffect::Detach(detach) => delta.push_mark(DeltaMark {
                count: mark.count,
                attach: None,
                detach: Some(detach.id()),
                fields,
            }),
            MarkEffect::AttachAndDetach { attach, detach } => {
                let source = attach_source(attach, mark.cell_id.as_ref());
                if let Some(fields) = fields {
                    delta.global.push(DeltaDetachedNodeChanges { id: source, fields });
                }
                if source != detach.id() {
                    delta.rename.push(DeltaDetachedNodeRename {
                        count: mark.count,
                        old_id: source,
                        new_id: detach.id(),
                    });
                }
            }
        }
    }
    Ok(delta.finish())
}

/// Detached content the change reads: revived cells and detached nodes
/// carrying nested changes, plus whatever nested changes need.
pub(super) fn relevant_removed_roots(
    change: &[Mark],
    from_child: ChildRemovedRoots<'_>,
) -> Result<Vec<DetachedNodeId>> {
    let mut roots = Vec::new();
    for mark in change {
        if let Some(cell) = &mark.cell_id {
            let revives = matches!(mark.effect.attach(), Some(Attach::Revive(_)));
            let detached_changes = matches!(mark.effect, MarkEffect::Noop) && mark.changes.is_some();
            if revives || detached_changes {
                roots.extend((0..mark.count).map(|i| cell.atom().offset(i)));
            }
        }
        if let Some(node) = mark.changes {
            roots.extend(from_child(node)?);
        }
    }
    Ok(roots)
}
