use crate::external::idle::{x11::X11IdleTimeSource, IdleTimeSource};
use std::time::Duration;

#[test]
#[ignore]
fn test_idle_time_grows() {
    let source = X11IdleTimeSource::new(None).expect("Couldn't connect to X server");
    let first = source.idle_time().expect("Couldn't query idle time");
    std::thread::sleep(Duration::from_millis(300));
    let second = source.idle_time().expect("Couldn't query idle time");
    // Holds as long as nobody touches the keyboard during the test
    assert!(second >= first);
}
