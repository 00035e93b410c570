use assert_cmd::Command;

pub fn coachd_bin() -> Command {
    #[allow(deprecated)]
    {
        Command::cargo_bin("coachd").expect("coachd test binary should build")
    }
}
