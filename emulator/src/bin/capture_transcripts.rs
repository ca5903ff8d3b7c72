use std::io;

#[allow(dead_code)]
#[path = "../session.rs"]
mod session;
#[allow(dead_code)]
#[path = "../sim.rs"]
mod sim;

use session::{Profile, Session};

/// Replays a scripted bench session on every board profile.
fn main() -> io::Result<()> {
    for profile in Profile::ALL {
        let mut session = Session::new(profile)?;
        record_bench(&mut session)?;
        record_schedules(&mut session)?;
        record_resync(&mut session)?;
        println!("wrote {}", profile.log_path());
    }
    Ok(())
}

fn replay(session: &mut Session, script: &[&str]) -> io::Result<()> {
    for line in script {
        session.handle_command(line)?;
    }
    Ok(())
}

fn record_bench(session: &mut Session) -> io::Result<()> {
    replay(
        session,
        &[
            "help",
            "status",
            "inj 1 open",
            "inj 1 close",
            "coil 2 charge",
            "coil 2 release",
            "pins",
        ],
    )
}

fn record_schedules(session: &mut Session) -> io::Result<()> {
    replay(
        session,
        &[
            "arm fuel 1 200 4000",
            "arm ign 1 1000 3000",
            "arm fuel 5 200 4000",
            "advance 2000",
            "inj 1 open",
            "status",
            "advance 5000",
            "arm ign 2 0 20000",
            "advance 15000",
            "events 12",
        ],
    )
}

fn record_resync(session: &mut Session) -> io::Result<()> {
    replay(
        session,
        &[
            "sync half",
            "status",
            "arm fuel 1 100 3000",
            "advance 500",
            "sync full",
            "advance 5000",
            "status",
            "stop",
            "events",
        ],
    )
}
