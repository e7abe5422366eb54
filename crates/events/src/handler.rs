/// Execute an aggregate command deterministically (no IO, no async).
///
/// Decide-then-evolve in one step: `handle` produces events, each event is
/// applied in order. Useful for unit tests and inline processing; production
/// paths go through the command dispatcher, which adds persistence,
/// optimistic concurrency and publication.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: autoshop_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
