/// Topic namespace of one robot instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Topics {
    robot: String,
}

impl Topics {
    pub fn new(robot: &str) -> Self {
        Topics { robot: robot.to_string() }
    }

    pub fn robot(&self) -> &str {
        &self.robot
    }

    pub fn servos(&self) -> String {
        format!("{}/servos", self.robot)
    }

    pub fn connection(&self) -> String {
        format!("{}/connection", self.robot)
    }

    pub fn status(&self) -> String {
        format!("{}/status", self.robot)
    }

    pub fn command(&self) -> String {
        format!("{}/command", self.robot)
    }

    pub fn controller_button(&self) -> String {
        format!("{}/controller/button", self.robot)
    }

    pub fn controller_connection(&self) -> String {
        format!("{}/controller/connection", self.robot)
    }
}
