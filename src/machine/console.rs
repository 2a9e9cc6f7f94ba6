use lazy_static::lazy_static;
use spin::Mutex;

/// The machine console. Output goes to stdout and is also kept line by line
/// so a test harness can inspect what the kernel printed.
pub struct Console {
    partial: String,
    history: Vec<String>,
}

impl Console {
    fn write(&mut self, s: &str) {
        self.partial.push_str(s);
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            self.history.push(line.trim_end_matches('\n').to_string());
        }
    }
}

lazy_static! {
    pub static ref CONSOLE: Mutex<Console> = Mutex::new(Console {
        partial: String::new(),
        history: Vec::new(),
    });
}

#[doc(hidden)]
pub fn _print(args: ::core::fmt::Arguments) {
    let text = args.to_string();
    print!("{}", text);
    CONSOLE.lock().write(&text);
}

#[macro_export]
macro_rules! console {
    ($($arg:tt)*) => {
        $crate::machine::console::_print(format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! consoleln {
    () => { $crate::console!("\n") };
    ($($arg:tt)*) => {
        $crate::machine::console::_print(format_args!($($arg)*));
        $crate::machine::console::_print(format_args!("\n"));
    };
}

/// All complete lines printed to the console so far.
pub fn history() -> Vec<String> {
    CONSOLE.lock().history.clone()
}
