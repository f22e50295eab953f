// Timeouts, topics, board addressing
use std::time::Duration;

// Control tick: the runtime re-asserts the latest intent this often
pub const CONTROL_TICK: Duration = Duration::from_millis(100);

// Command timeout for the watchdog; a teleop peer that goes silent for
// longer than this gets its intent replaced with neutral
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Minimum wall-clock spacing between applied motor updates
pub const MOTOR_UPDATE_GATE: Duration = Duration::from_millis(40);

// Spacing between consecutive motor writes within one update; the boards
// cannot absorb writes that arrive faster than this
pub const MOTOR_WRITE_SPACING: Duration = Duration::from_millis(15);

// The rear battery is less time-critical; after a rear read the poll
// cycle pauses this long before resuming with the front board
pub const REAR_BATTERY_DEFERRAL: Duration = Duration::from_secs(30);

// Pause before re-attempting a failed connection
pub const CONNECT_RETRY_PAUSE: Duration = Duration::from_secs(1);

// Zenoh topics
pub const TOPIC_CMD_DRIVE: &str = "cica/cmd/drive"; // intent commands
pub const TOPIC_STATUS: &str = "cica/state/connection"; // platform ready status
pub const TOPIC_BATTERY: &str = "cica/state/battery"; // battery readings

// Fixed hardware addresses of the two bCore boards; overridable on the
// command line for a different unit
pub const FRONT_BOARD_ADDRESS: &str = "00:07:80:38:FE:66";
pub const REAR_BOARD_ADDRESS: &str = "00:07:80:38:FE:32";
