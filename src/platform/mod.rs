// ABOUTME: Platform adapters bundled with the binary.
// ABOUTME: Only the console adapter ships here; chat-network adapters implement PlatformAdapter externally.

pub mod console;

pub use console::ConsoleAdapter;
