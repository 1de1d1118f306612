/// Progress figures handed to an [`EventHandler`] after each factorization.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FactorizationEvent {
    pub iteration: usize,
    /// Working objective (modified costs, fake bounds).
    pub objective: f64,
    pub sum_primal_infeasibilities: f64,
    pub number_primal_infeasibilities: usize,
    pub number_fake_bounds: usize,
    pub elapsed_seconds: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventAction {
    Continue,
    /// Stop the solve; the result is reported as an iteration limit.
    Stop,
}

/// Hook into the outer loop of the solver.
pub trait EventHandler {
    fn after_factorization(&mut self, event: &FactorizationEvent) -> EventAction;
}

impl<F> EventHandler for F
where
    F: FnMut(&FactorizationEvent) -> EventAction,
{
    fn after_factorization(&mut self, event: &FactorizationEvent) -> EventAction {
        self(event)
    }
}
