//! Drag-and-drop reordering of category cards.
//!
//! A drag session moves through `Idle -> Dragging -> Committing -> Idle`.
//! While dragging, every pointer move re-slots the dragged card among its
//! siblings by comparing the pointer with each sibling's vertical midpoint.
//! Nothing is persisted until the drop, which freezes the visual order and
//! turns it into one `order = position` write per card.

use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::{Collection, WriteBatch};

/// Where on the card the pointer went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragSource {
    Handle,
    Body,
}

/// On-screen geometry of one sibling card, in visual order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CardSlot {
    pub id: Uuid,
    pub top: f64,
    pub height: f64,
}

impl CardSlot {
    pub fn midpoint(&self) -> f64 {
        self.top + self.height / 2.0
    }

    /// Evenly stacked slots of unit height, one per id.
    pub fn uniform(order: &[Uuid]) -> Vec<CardSlot> {
        order
            .iter()
            .enumerate()
            .map(|(idx, id)| CardSlot {
                id: *id,
                top: idx as f64,
                height: 1.0,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DragError {
    #[error("drag must start from the card handle")]
    NotAHandle,
    #[error("card is not part of the list: {0}")]
    UnknownCard(Uuid),
    #[error("a drag session is already active")]
    Busy,
    #[error("no card is being dragged")]
    NotDragging,
    #[error("no reorder is being committed")]
    NotCommitting,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Dragging {
        dragged: Uuid,
        order: Vec<Uuid>,
    },
    Committing {
        order: Vec<Uuid>,
    },
}

/// The frozen visual order produced by a drop.
#[derive(Debug, Clone, PartialEq)]
pub struct ReorderPlan {
    pub order: Vec<Uuid>,
}

impl ReorderPlan {
    /// `(card, new order value)` pairs, contiguous from 0.
    pub fn assignments(&self) -> impl Iterator<Item = (Uuid, i64)> + '_ {
        self.order
            .iter()
            .enumerate()
            .map(|(idx, id)| (*id, idx as i64))
    }

    pub fn to_batch(&self) -> WriteBatch {
        let mut batch = WriteBatch::default();
        for (id, order) in self.assignments() {
            let mut fields = Map::new();
            fields.insert("order".to_string(), Value::from(order));
            batch.update(Collection::Categories, id, fields);
        }
        batch
    }
}

/// Read-only view of the session for the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragView<'a> {
    pub dragging: Option<Uuid>,
    pub committing: bool,
    pub order: Option<&'a [Uuid]>,
}

#[derive(Debug, Clone, Default)]
pub struct ReorderController {
    phase: Phase,
}

impl ReorderController {
    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    pub fn dragging(&self) -> Option<Uuid> {
        match &self.phase {
            Phase::Dragging { dragged, .. } => Some(*dragged),
            _ => None,
        }
    }

    /// The optimistic order shown while a session is active.
    pub fn visual_order(&self) -> Option<&[Uuid]> {
        match &self.phase {
            Phase::Idle => None,
            Phase::Dragging { order, .. } | Phase::Committing { order } => Some(order),
        }
    }

    pub fn view(&self) -> DragView<'_> {
        DragView {
            dragging: self.dragging(),
            committing: matches!(self.phase, Phase::Committing { .. }),
            order: self.visual_order(),
        }
    }

    #[tracing::instrument(skip(self, current))]
    pub fn start(
        &mut self,
        id: Uuid,
        source: DragSource,
        current: &[Uuid],
    ) -> Result<(), DragError> {
        if !self.is_idle() {
            return Err(DragError::Busy);
        }
        if source != DragSource::Handle {
            debug!("drag start outside handle rejected");
            return Err(DragError::NotAHandle);
        }
        if !current.contains(&id) {
            return Err(DragError::UnknownCard(id));
        }

        self.phase = Phase::Dragging {
            dragged: id,
            order: current.to_vec(),
        };
        debug!(%id, "drag started");
        Ok(())
    }

    /// Re-slots the dragged card for a pointer at `pointer_y`. Returns whether
    /// the visual order changed.
    pub fn over(&mut self, pointer_y: f64, layout: &[CardSlot]) -> Result<bool, DragError> {
        let Phase::Dragging { dragged, order } = &mut self.phase else {
            return Err(DragError::NotDragging);
        };

        let before = insertion_point(layout, *dragged, pointer_y);
        let next = moved(order, *dragged, before);
        if next == *order {
            return Ok(false);
        }

        *order = next;
        Ok(true)
    }

    /// Handles the drop: fits the visual order to the cards `displayed` right
    /// now, freezes it and moves to `Committing`.
    ///
    /// Cards removed since the drag started are dropped from the plan and
    /// cards added since are appended, so every displayed card gets an index.
    #[tracing::instrument(skip(self, displayed))]
    pub fn commit(&mut self, displayed: &[Uuid]) -> Result<ReorderPlan, DragError> {
        if !matches!(self.phase, Phase::Dragging { .. }) {
            return Err(DragError::NotDragging);
        }
        let Phase::Dragging { order, .. } = std::mem::take(&mut self.phase) else {
            return Err(DragError::NotDragging);
        };
        let order = reconciled(&order, displayed);

        info!(cards = order.len(), "committing reorder");
        self.phase = Phase::Committing {
            order: order.clone(),
        };
        Ok(ReorderPlan { order })
    }

    /// Abandons a drag that never dropped.
    pub fn cancel(&mut self) -> bool {
        if matches!(self.phase, Phase::Dragging { .. }) {
            self.phase = Phase::Idle;
            debug!("drag cancelled");
            return true;
        }
        false
    }

    /// Ends the commit whatever its outcome; the next snapshot push decides
    /// what the list finally shows.
    pub fn finish(&mut self) -> Result<(), DragError> {
        if !matches!(self.phase, Phase::Committing { .. }) {
            return Err(DragError::NotCommitting);
        }
        self.phase = Phase::Idle;
        Ok(())
    }
}

/// The sibling the dragged card should be placed before, or `None` for the end.
///
/// Picks the card whose midpoint is below the pointer and closest to it.
pub fn insertion_point(layout: &[CardSlot], dragged: Uuid, pointer_y: f64) -> Option<Uuid> {
    let mut best: Option<(f64, Uuid)> = None;
    for slot in layout.iter().filter(|slot| slot.id != dragged) {
        let offset = pointer_y - slot.midpoint();
        if offset < 0.0 && best.is_none_or(|(closest, _)| offset > closest) {
            best = Some((offset, slot.id));
        }
    }
    best.map(|(_, id)| id)
}

/// `visual` restricted to `present`, followed by whatever `present` adds.
pub fn reconciled(visual: &[Uuid], present: &[Uuid]) -> Vec<Uuid> {
    let mut out: Vec<Uuid> = visual
        .iter()
        .copied()
        .filter(|id| present.contains(id))
        .collect();
    out.extend(present.iter().copied().filter(|id| !visual.contains(id)));
    out
}

fn moved(order: &[Uuid], dragged: Uuid, before: Option<Uuid>) -> Vec<Uuid> {
    let mut next: Vec<Uuid> = order.iter().copied().filter(|id| *id != dragged).collect();
    let at = before
        .and_then(|target| next.iter().position(|id| *id == target))
        .unwrap_or(next.len());
    next.insert(at, dragged);
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::WriteOp;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    fn drag_to(order: &[Uuid], dragged: Uuid, pointer_y: f64) -> ReorderPlan {
        let mut ctl = ReorderController::default();
        ctl.start(dragged, DragSource::Handle, order)
            .expect("start drag");
        ctl.over(pointer_y, &CardSlot::uniform(order))
            .expect("drag over");
        ctl.commit(order).expect("drop")
    }

    #[test]
    fn dragging_last_card_before_first_persists_new_indices() {
        let order = ids(3);
        let (a, b, c) = (order[0], order[1], order[2]);

        let plan = drag_to(&order, c, 0.1);
        let assigned: Vec<_> = plan.assignments().collect();
        assert_eq!(assigned, vec![(c, 0), (a, 1), (b, 2)]);
    }

    #[test]
    fn pointer_below_every_midpoint_moves_card_to_end() {
        let order = ids(4);
        let plan = drag_to(&order, order[0], 10.0);
        assert_eq!(plan.order.last(), Some(&order[0]));
        assert_eq!(plan.order.len(), 4);
    }

    #[test]
    fn drop_in_place_rewrites_current_indices() {
        let order = ids(3);
        let plan = drag_to(&order, order[1], 1.2);
        assert_eq!(plan.order, order);

        let batch = plan.to_batch();
        assert_eq!(batch.len(), 3);
        for (idx, op) in batch.ops.iter().enumerate() {
            let WriteOp::Update { id, fields, .. } = op else {
                panic!("reorder only updates");
            };
            assert_eq!(*id, order[idx]);
            assert_eq!(fields["order"], Value::from(idx as i64));
        }
    }

    #[test]
    fn every_drop_yields_a_contiguous_permutation() {
        let order = ids(5);
        for dragged in &order {
            for step in 0..12 {
                let pointer_y = step as f64 * 0.5 - 0.5;
                let plan = drag_to(&order, *dragged, pointer_y);

                let mut sorted = plan.order.clone();
                sorted.sort();
                let mut expected = order.clone();
                expected.sort();
                assert_eq!(sorted, expected);

                let values: Vec<i64> = plan.assignments().map(|(_, v)| v).collect();
                assert_eq!(values, (0..5).collect::<Vec<i64>>());
            }
        }
    }

    #[test]
    fn over_onto_itself_reports_no_change() {
        let order = ids(3);
        let mut ctl = ReorderController::default();
        ctl.start(order[1], DragSource::Handle, &order)
            .expect("start");
        let changed = ctl
            .over(1.5, &CardSlot::uniform(&order))
            .expect("over");
        assert!(!changed);
        assert_eq!(ctl.visual_order(), Some(order.as_slice()));
    }

    #[test]
    fn body_drag_is_rejected_and_stays_idle() {
        let order = ids(2);
        let mut ctl = ReorderController::default();
        assert_eq!(
            ctl.start(order[0], DragSource::Body, &order),
            Err(DragError::NotAHandle)
        );
        assert!(ctl.is_idle());

        let stranger = Uuid::new_v4();
        assert_eq!(
            ctl.start(stranger, DragSource::Handle, &order),
            Err(DragError::UnknownCard(stranger))
        );
        assert!(ctl.is_idle());
    }

    #[test]
    fn session_walks_through_all_phases() {
        let order = ids(2);
        let mut ctl = ReorderController::default();
        assert_eq!(ctl.finish(), Err(DragError::NotCommitting));
        assert_eq!(ctl.commit(&order), Err(DragError::NotDragging));

        ctl.start(order[0], DragSource::Handle, &order)
            .expect("start");
        assert_eq!(ctl.dragging(), Some(order[0]));
        assert_eq!(
            ctl.start(order[1], DragSource::Handle, &order),
            Err(DragError::Busy)
        );

        ctl.commit(&order).expect("drop");
        assert!(ctl.view().committing);
        assert!(ctl.visual_order().is_some());
        assert!(!ctl.cancel());

        ctl.finish().expect("finish");
        assert!(ctl.is_idle());
        assert_eq!(ctl.visual_order(), None);
    }

    #[test]
    fn drop_fits_plan_to_cards_added_or_removed_mid_drag() {
        let order = ids(3);
        let (a, b, c) = (order[0], order[1], order[2]);
        let d = Uuid::new_v4();

        let mut ctl = ReorderController::default();
        ctl.start(c, DragSource::Handle, &order).expect("start");
        ctl.over(0.0, &CardSlot::uniform(&order)).expect("over");

        // b vanished and d arrived while the card was in flight.
        let plan = ctl.commit(&[c, a, d]).expect("drop");
        let assigned: Vec<_> = plan.assignments().collect();
        assert_eq!(assigned, vec![(c, 0), (a, 1), (d, 2)]);
        assert!(!plan.order.contains(&b));
        assert_eq!(ctl.visual_order(), Some(plan.order.as_slice()));
    }

    #[test]
    fn cancel_discards_the_visual_order() {
        let order = ids(3);
        let mut ctl = ReorderController::default();
        ctl.start(order[2], DragSource::Handle, &order)
            .expect("start");
        ctl.over(0.0, &CardSlot::uniform(&order)).expect("over");
        assert!(ctl.cancel());
        assert!(ctl.is_idle());
    }
}
