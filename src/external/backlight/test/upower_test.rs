use crate::external::backlight::{
    upower::{UPowerBacklightService, UPOWER_KEYBOARD},
    BacklightService, KeyboardId,
};

#[tokio::test]
#[ignore]
async fn test_upower_backlight() {
    let connection = zbus::Connection::system()
        .await
        .expect("Couldn't create system D-Bus connection");
    let service = UPowerBacklightService::new(connection)
        .await
        .expect("UPower has no keyboard backlight");
    assert_eq!(service.keyboards().await.unwrap(), vec![UPOWER_KEYBOARD]);
    assert!(service.brightness(KeyboardId(2)).await.is_err());

    let original = service.brightness(UPOWER_KEYBOARD).await.unwrap();
    service.set_brightness(UPOWER_KEYBOARD, 1.0).await.unwrap();
    assert_eq!(service.brightness(UPOWER_KEYBOARD).await.unwrap(), 1.0);
    service
        .set_brightness(UPOWER_KEYBOARD, original)
        .await
        .unwrap();
}
