use super::{BuildPlan, CommandTemplate};

pub(super) fn plans() -> Vec<BuildPlan> {
    vec![
        BuildPlan::interpreted(
            "python",
            "main.py",
            CommandTemplate::new("python3", &["-u", "{source}"]),
        ),
        BuildPlan::interpreted(
            "javascript",
            "main.js",
            CommandTemplate::new("node", &["{source}"]),
        ),
        BuildPlan::interpreted(
            "php",
            "main.php",
            CommandTemplate::new("php", &["-f", "{source}"]),
        ),
        BuildPlan::interpreted(
            "perl",
            "main.pl",
            CommandTemplate::new("perl", &["{source}"]),
        ),
        // javac insists the file is named after its public class
        BuildPlan::compiled(
            "java",
            "Main.java",
            CommandTemplate::new("javac", &["Main.java"]),
            CommandTemplate::new("java", &["-cp", "{workspace}", "Main"]),
        ),
        BuildPlan::compiled(
            "c",
            "main.c",
            CommandTemplate::new("gcc", &["main.c", "-o", "main_exe"]),
            CommandTemplate::new("{workspace}/main_exe", &[]),
        ),
        BuildPlan::compiled(
            "c++",
            "main.cpp",
            CommandTemplate::new("g++", &["main.cpp", "-o", "main_exe"]),
            CommandTemplate::new("{workspace}/main_exe", &[]),
        ),
    ]
}
