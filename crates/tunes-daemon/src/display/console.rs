use std::io::Write;

use tunes_proto::protocol::NowPlaying;

use super::Display;

/// Line-oriented output for plain mode.
pub struct ConsoleDisplay<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> ConsoleDisplay<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

fn now_playing_line(now_playing: &NowPlaying) -> String {
    match now_playing.headline() {
        Some(headline) => format!("Playing {}", headline),
        None => "Playing next track".to_string(),
    }
}

impl<W: Write + Send> Display for ConsoleDisplay<W> {
    fn log(&mut self, line: &str) {
        let _ = writeln!(self.out, "{}", line);
        let _ = self.out.flush();
    }

    fn show_now_playing(&mut self, now_playing: &NowPlaying) {
        let _ = writeln!(self.out, "{}", now_playing_line(now_playing));
        let _ = self.out.flush();
    }

    fn close(&mut self) {
        let _ = writeln!(self.out);
        let _ = self.out.flush();
    }
}
