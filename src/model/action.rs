//! Actions et arguments d'un service.

/// Direction d'un argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn descriptor_name(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }

    pub fn from_descriptor_name(name: &str) -> Option<Self> {
        match name.trim() {
            "in" => Some(Direction::In),
            "out" => Some(Direction::Out),
            _ => None,
        }
    }
}

/// Argument d'une action, lié à une variable d'état du même service.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    name: String,
    direction: Direction,
    related_state_variable: String,
    retval: bool,
}

impl Argument {
    pub fn new(
        name: impl Into<String>,
        direction: Direction,
        related_state_variable: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            related_state_variable: related_state_variable.into(),
            retval: false,
        }
    }

    /// Marque cet argument de sortie comme valeur de retour.
    pub fn as_retval(mut self) -> Self {
        self.retval = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn related_state_variable(&self) -> &str {
        &self.related_state_variable
    }

    pub fn is_retval(&self) -> bool {
        self.retval
    }
}

/// Action : nom et arguments ordonnés (entrées puis sorties).
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    name: String,
    arguments: Vec<Argument>,
}

impl Action {
    pub fn new(name: impl Into<String>, arguments: Vec<Argument>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    /// Arguments d'entrée, dans l'ordre déclaré.
    pub fn inputs(&self) -> impl Iterator<Item = &Argument> {
        self.arguments
            .iter()
            .filter(|a| a.direction() == Direction::In)
    }

    /// Arguments de sortie, dans l'ordre déclaré.
    pub fn outputs(&self) -> impl Iterator<Item = &Argument> {
        self.arguments
            .iter()
            .filter(|a| a.direction() == Direction::Out)
    }

    /// L'argument de sortie marqué valeur de retour, s'il existe.
    pub fn retval(&self) -> Option<&Argument> {
        self.outputs().find(|a| a.is_retval())
    }
}
