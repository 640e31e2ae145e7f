//! Current page and zoom, plus render tickets for discarding stale renders.

pub const MIN_ZOOM: f32 = 0.5;
pub const MAX_ZOOM: f32 = 3.0;
pub const ZOOM_STEP: f32 = 0.25;

const MIN_STEPS: u32 = 2;
const MAX_STEPS: u32 = 12;

/// Tag attached to a render request.
///
/// A finished render is only applied when its ticket is still current;
/// any page or zoom change in between makes it stale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTicket {
    pub page: u32,
    pub zoom: f32,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
    total_pages: u32,
    page: u32,
    /// Zoom in quarter steps, so the scale is always a multiple of 0.25.
    zoom_steps: u32,
    generation: u64,
}

fn snap(zoom: f32) -> u32 {
    if !zoom.is_finite() {
        return MIN_STEPS;
    }
    (zoom / ZOOM_STEP)
        .round()
        .clamp(MIN_STEPS as f32, MAX_STEPS as f32) as u32
}

impl ViewState {
    pub fn new(total_pages: u32, initial_zoom: f32) -> Self {
        ViewState {
            total_pages: total_pages.max(1),
            page: 1,
            zoom_steps: snap(initial_zoom),
            generation: 0,
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn zoom(&self) -> f32 {
        self.zoom_steps as f32 * ZOOM_STEP
    }

    /// Zoom as a whole percentage, e.g. 125.
    pub fn zoom_percent(&self) -> u32 {
        self.zoom_steps * 25
    }

    pub fn can_go_prev(&self) -> bool {
        self.page > 1
    }

    pub fn can_go_next(&self) -> bool {
        self.page < self.total_pages
    }

    pub fn can_zoom_in(&self) -> bool {
        self.zoom_steps < MAX_STEPS
    }

    pub fn can_zoom_out(&self) -> bool {
        self.zoom_steps > MIN_STEPS
    }

    pub fn next(&mut self) -> bool {
        self.go_to(self.page.saturating_add(1))
    }

    pub fn prev(&mut self) -> bool {
        self.go_to(self.page.saturating_sub(1))
    }

    /// Jump to `page`, clamped to the document.
    pub fn go_to(&mut self, page: u32) -> bool {
        let clamped = page.clamp(1, self.total_pages);
        if clamped == self.page {
            return false;
        }
        self.page = clamped;
        self.generation += 1;
        true
    }

    pub fn zoom_in(&mut self) -> bool {
        self.set_steps(self.zoom_steps.saturating_add(1))
    }

    pub fn zoom_out(&mut self) -> bool {
        self.set_steps(self.zoom_steps.saturating_sub(1))
    }

    /// Set zoom, snapped to the nearest step and clamped.
    pub fn set_zoom(&mut self, zoom: f32) -> bool {
        self.set_steps(snap(zoom))
    }

    fn set_steps(&mut self, steps: u32) -> bool {
        let clamped = steps.clamp(MIN_STEPS, MAX_STEPS);
        if clamped == self.zoom_steps {
            return false;
        }
        self.zoom_steps = clamped;
        self.generation += 1;
        true
    }

    /// Force outstanding tickets stale without changing page or zoom.
    pub fn invalidate(&mut self) {
        self.generation += 1;
    }

    pub fn ticket(&self) -> RenderTicket {
        RenderTicket {
            page: self.page,
            zoom: self.zoom(),
            generation: self.generation,
        }
    }

    pub fn is_current(&self, ticket: &RenderTicket) -> bool {
        ticket.generation == self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_clamps_at_both_ends() {
        let mut view = ViewState::new(3, 1.0);
        assert!(!view.prev());
        assert_eq!(view.page(), 1);
        assert!(view.next());
        assert!(view.next());
        assert!(!view.next());
        assert_eq!(view.page(), 3);
        assert!(view.go_to(0));
        assert_eq!(view.page(), 1);
        assert!(view.go_to(99));
        assert_eq!(view.page(), 3);
    }

    #[test]
    fn zoom_steps_by_quarters_within_bounds() {
        let mut view = ViewState::new(1, 0.5);
        assert!(!view.can_zoom_out());
        assert!(!view.zoom_out());
        assert!(view.zoom_in());
        assert_eq!(view.zoom(), 0.75);
        assert!(view.set_zoom(10.0));
        assert_eq!(view.zoom(), MAX_ZOOM);
        assert!(!view.zoom_in());
        assert!(view.set_zoom(1.13));
        assert_eq!(view.zoom(), 1.25);
        assert_eq!(view.zoom_percent(), 125);
    }

    #[test]
    fn initial_zoom_is_snapped() {
        assert_eq!(ViewState::new(1, 0.1).zoom(), MIN_ZOOM);
        assert_eq!(ViewState::new(1, f32::NAN).zoom(), MIN_ZOOM);
        assert_eq!(ViewState::new(1, 1.6).zoom(), 1.5);
    }

    #[test]
    fn tickets_go_stale_after_any_change() {
        let mut view = ViewState::new(2, 1.0);
        let first = view.ticket();
        assert!(view.is_current(&first));

        view.next();
        assert!(!view.is_current(&first));
        let second = view.ticket();
        assert_eq!(second.page, 2);

        view.zoom_in();
        assert!(!view.is_current(&second));

        // no-op changes keep tickets valid
        let third = view.ticket();
        view.next();
        assert!(view.is_current(&third));

        view.invalidate();
        assert!(!view.is_current(&third));
    }
}
