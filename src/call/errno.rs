//! The errno slot shared by native calls and callbacks.
//!
//! Each thread keeps a saved errno. It is written into the OS errno right
//! before a native call and read back right after, and the other way round
//! around the body of a callback, so host activity between calls cannot
//! clobber what native code sees.

use std::cell::Cell;

use errno::Errno;

thread_local! {
    static SAVED: Cell<i32> = const { Cell::new(0) };
}

/// The errno value the last native call on this thread left behind.
pub fn get_errno() -> i32 {
    SAVED.with(Cell::get)
}

/// Set the errno value the next native call on this thread starts with.
pub fn set_errno(value: i32) {
    SAVED.with(|saved| saved.set(value));
}

/// Saved slot to OS errno.
pub(crate) fn restore() {
    errno::set_errno(Errno(get_errno()));
}

/// OS errno to saved slot.
pub(crate) fn capture() {
    set_errno(errno::errno().0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saved_slot_round_trip() {
        set_errno(42);
        assert_eq!(get_errno(), 42);
        restore();
        assert_eq!(errno::errno().0, 42);
        errno::set_errno(Errno(7));
        capture();
        assert_eq!(get_errno(), 7);
    }

    #[test]
    fn test_slot_is_per_thread() {
        set_errno(3);
        let other = std::thread::spawn(get_errno).join().unwrap_or(-1);
        assert_eq!(other, 0);
        assert_eq!(get_errno(), 3);
    }
}
