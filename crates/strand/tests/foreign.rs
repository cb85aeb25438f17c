// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! Threads not spawned by strand reach the active run through the
//! process-wide slot. Kept in its own binary so no other run competes for
//! that slot.

use std::time::Duration;

#[test]
fn foreign_thread_promotes_into_active_run() {
    strand::run(|| {
        let main = strand::current_task();
        let other = std::thread::spawn(|| {
            strand::enable();
            strand::sleep(Duration::from_millis(1))?;
            Ok::<_, strand::Error>(strand::current_task())
        })
        .join()
        .unwrap()?;
        assert_ne!(other, main);
        Ok(())
    })
    .unwrap();
}
