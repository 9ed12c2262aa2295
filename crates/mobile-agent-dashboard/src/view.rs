use crate::session::DashboardSession;

/// Receives the session after every applied message.
pub trait DashboardView {
    fn render(&mut self, session: &DashboardSession);
}

impl<F> DashboardView for F
where
    F: FnMut(&DashboardSession),
{
    fn render(&mut self, session: &DashboardSession) {
        self(session);
    }
}

/// Discards every render.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullView;

impl DashboardView for NullView {
    fn render(&mut self, _session: &DashboardSession) {}
}
