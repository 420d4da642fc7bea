//! Status enums with a fixed table of legal edges.

/// A status whose legal next states are a static table.
///
/// Implementors only list successors; the edge check is derived from it.
/// Staying in the same state is not an edge.
pub trait StateMachine: Sized + Copy + PartialEq + std::fmt::Debug + 'static {
    /// States reachable in one step.
    fn successors(&self) -> &'static [Self];

    fn can_transition_to(&self, target: &Self) -> bool {
        self.successors().contains(target)
    }
}
