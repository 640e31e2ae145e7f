//! Property tests for page and zoom navigation.

use pdf_annotate::navigation::{MAX_ZOOM, MIN_ZOOM, ZOOM_STEP};
use pdf_annotate::ViewState;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Action {
    Next,
    Prev,
    GoTo(u32),
    ZoomIn,
    ZoomOut,
    SetZoom(f32),
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::Next),
        Just(Action::Prev),
        (0u32..40).prop_map(Action::GoTo),
        Just(Action::ZoomIn),
        Just(Action::ZoomOut),
        (-2.0f32..6.0).prop_map(Action::SetZoom),
    ]
}

fn apply(view: &mut ViewState, action: &Action) -> bool {
    match action {
        Action::Next => view.next(),
        Action::Prev => view.prev(),
        Action::GoTo(page) => view.go_to(*page),
        Action::ZoomIn => view.zoom_in(),
        Action::ZoomOut => view.zoom_out(),
        Action::SetZoom(zoom) => view.set_zoom(*zoom),
    }
}

proptest! {
    #[test]
    fn page_and_zoom_stay_in_range(
        total in 1u32..20,
        initial in 0.0f32..5.0,
        actions in prop::collection::vec(action(), 0..64),
    ) {
        let mut view = ViewState::new(total, initial);
        for action in &actions {
            apply(&mut view, action);

            prop_assert!(view.page() >= 1 && view.page() <= total);
            prop_assert!(view.zoom() >= MIN_ZOOM && view.zoom() <= MAX_ZOOM);
            let steps = view.zoom() / ZOOM_STEP;
            prop_assert_eq!(steps, steps.round());
            prop_assert_eq!(view.can_go_prev(), view.page() > 1);
            prop_assert_eq!(view.can_go_next(), view.page() < total);
        }
    }

    #[test]
    fn only_real_changes_make_tickets_stale(
        total in 1u32..10,
        actions in prop::collection::vec(action(), 1..32),
    ) {
        let mut view = ViewState::new(total, 1.0);
        for action in &actions {
            let ticket = view.ticket();
            let before = (view.page(), view.zoom());
            let changed = apply(&mut view, action);

            prop_assert_eq!(changed, before != (view.page(), view.zoom()));
            prop_assert_eq!(view.is_current(&ticket), !changed);
        }
    }

    #[test]
    fn set_zoom_snaps_to_nearest_step(zoom in MIN_ZOOM..MAX_ZOOM) {
        let mut view = ViewState::new(1, 1.0);
        view.set_zoom(zoom);
        prop_assert!((view.zoom() - zoom).abs() <= ZOOM_STEP / 2.0 + f32::EPSILON);
    }
}

#[test]
fn single_page_document_cannot_move() {
    let mut view = ViewState::new(1, 0.5);
    assert!(!view.next());
    assert!(!view.prev());
    assert!(!view.go_to(5));
    assert!(!view.zoom_out());
    assert!(view.zoom_in());
    assert_eq!(view.zoom_percent(), 75);
}
