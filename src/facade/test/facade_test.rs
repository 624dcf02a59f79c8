use crate::{
    external::backlight::{
        mock::{ManualPrecedence, MockBacklightService},
        BacklightState, KeyboardId,
    },
    facade::BacklightFacade,
};

const BUILT_IN: KeyboardId = KeyboardId(1);
const EXTERNAL: KeyboardId = KeyboardId(7);
const UNKNOWN: KeyboardId = KeyboardId(42);

fn make_facade() -> (BacklightFacade<MockBacklightService>, MockBacklightService) {
    let service = MockBacklightService::new()
        .with_keyboard(BUILT_IN, true)
        .with_keyboard(EXTERNAL, false);
    (BacklightFacade::new(service.clone()), service)
}

#[tokio::test]
async fn test_built_in_keyboard_scenario() {
    let (facade, _) = make_facade();
    assert!(facade.is_built_in(BUILT_IN).await);
    assert!(facade.set_brightness(BUILT_IN, 0.5).await);
    assert_eq!(facade.brightness(BUILT_IN).await, 0.5);
    assert!(facade.set_idle_dim_timeout(BUILT_IN, 30.0).await);
    assert_eq!(facade.idle_dim_timeout(BUILT_IN).await, 30.0);
}

#[tokio::test]
async fn test_brightness_setting() {
    let (facade, _) = make_facade();
    for level in [0.0, 0.25, 0.8, 1.0] {
        assert!(facade.set_brightness(EXTERNAL, level).await);
        assert_eq!(facade.brightness(EXTERNAL).await, level);
    }
}

#[tokio::test]
async fn test_out_of_range_brightness() {
    let (facade, _) = make_facade();
    assert!(facade.set_brightness(BUILT_IN, 0.3).await);
    assert!(!facade.set_brightness(BUILT_IN, 1.5).await);
    assert!(!facade.set_brightness(BUILT_IN, -0.1).await);
    assert!(!facade.set_brightness(BUILT_IN, f64::NAN).await);
    assert_eq!(facade.brightness(BUILT_IN).await, 0.3);
}

#[tokio::test]
async fn test_invalid_idle_dim_timeout() {
    let (facade, _) = make_facade();
    assert!(!facade.set_idle_dim_timeout(BUILT_IN, -1.0).await);
    assert!(!facade.set_idle_dim_timeout(BUILT_IN, f64::INFINITY).await);
    assert_eq!(facade.idle_dim_timeout(BUILT_IN).await, 0.0);
}

#[tokio::test]
async fn test_auto_brightness_toggle() {
    let (facade, _) = make_facade();
    for keyboard in [BUILT_IN, EXTERNAL] {
        assert!(facade.set_auto_brightness(keyboard, true).await);
        assert!(facade.is_auto_brightness_enabled(keyboard).await);
        assert!(facade.set_auto_brightness(keyboard, false).await);
        assert!(!facade.is_auto_brightness_enabled(keyboard).await);
    }
}

#[tokio::test]
async fn test_manual_brightness_precedence() {
    let (facade, service) = make_facade();
    facade.set_auto_brightness(BUILT_IN, true).await;
    assert!(facade.set_brightness(BUILT_IN, 0.4).await);
    assert!(facade.is_auto_brightness_enabled(BUILT_IN).await);

    service.set_manual_precedence(ManualPrecedence::DisableAuto);
    assert!(facade.set_brightness(BUILT_IN, 0.6).await);
    assert!(!facade.is_auto_brightness_enabled(BUILT_IN).await);
    assert_eq!(facade.brightness(BUILT_IN).await, 0.6);
}

#[tokio::test]
async fn test_unknown_keyboard() {
    let (facade, _) = make_facade();
    assert_eq!(facade.brightness(UNKNOWN).await, 0.0);
    assert!(!facade.set_brightness(UNKNOWN, 0.5).await);
    assert!(!facade.is_auto_brightness_enabled(UNKNOWN).await);
    assert!(!facade.set_auto_brightness(UNKNOWN, true).await);
    assert_eq!(facade.idle_dim_timeout(UNKNOWN).await, 0.0);
    assert!(!facade.set_idle_dim_timeout(UNKNOWN, 10.0).await);
    assert!(!facade.is_built_in(UNKNOWN).await);
    assert!(!facade.is_ambient_feature_available(UNKNOWN).await);
    assert!(!facade.is_dimmed(UNKNOWN).await);
    assert!(!facade.is_saturated(UNKNOWN).await);
    assert!(!facade.is_suppressed(UNKNOWN).await);
}

#[tokio::test]
async fn test_enumeration() {
    let (facade, service) = make_facade();
    let first = facade.enumerate_keyboards().await;
    assert_eq!(first, vec![BUILT_IN, EXTERNAL]);
    assert_eq!(facade.enumerate_keyboards().await, first);

    service.remove_keyboard(EXTERNAL);
    assert_eq!(facade.enumerate_keyboards().await, vec![BUILT_IN]);

    let empty = BacklightFacade::new(MockBacklightService::new());
    assert!(empty.enumerate_keyboards().await.is_empty());
}

#[tokio::test]
async fn test_device_info() {
    let (facade, service) = make_facade();
    assert!(facade.is_built_in(BUILT_IN).await);
    assert!(!facade.is_built_in(EXTERNAL).await);
    assert!(facade.is_ambient_feature_available(BUILT_IN).await);
    assert!(!facade.is_ambient_feature_available(EXTERNAL).await);
    service.set_ambient_available(EXTERNAL, true);
    assert!(facade.is_ambient_feature_available(EXTERNAL).await);
}

#[tokio::test]
async fn test_state_flags() {
    let (facade, service) = make_facade();
    assert_eq!(facade.state(BUILT_IN).await, BacklightState::default());
    service.set_state(
        BUILT_IN,
        BacklightState {
            dimmed: true,
            saturated: false,
            suppressed: true,
        },
    );
    assert!(facade.is_dimmed(BUILT_IN).await);
    assert!(!facade.is_saturated(BUILT_IN).await);
    assert!(facade.is_suppressed(BUILT_IN).await);
    assert!(!facade.is_dimmed(EXTERNAL).await);
}

#[tokio::test]
async fn test_failing_service() {
    let (facade, service) = make_facade();
    service.set_failure_mode(true);
    assert!(facade.enumerate_keyboards().await.is_empty());
    assert!(!facade.set_brightness(BUILT_IN, 0.5).await);
    assert_eq!(facade.brightness(BUILT_IN).await, 0.0);
    assert!(!facade.is_built_in(BUILT_IN).await);

    service.set_failure_mode(false);
    assert!(facade.set_brightness(BUILT_IN, 0.5).await);
    assert_eq!(facade.brightness(BUILT_IN).await, 0.5);
}
