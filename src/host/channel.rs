use std::io::{Read, Write};

pub trait InvocationChannel {
    fn input_string(&mut self) -> std::io::Result<String>;
    fn output_string(&mut self, output: &str) -> std::io::Result<()>;
}

#[derive(Debug, Default)]
pub struct StdioChannel;

impl InvocationChannel for StdioChannel {
    fn input_string(&mut self) -> std::io::Result<String> {
        let mut input = String::new();
        std::io::stdin().read_to_string(&mut input)?;
        Ok(input)
    }

    fn output_string(&mut self, output: &str) -> std::io::Result<()> {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(output.as_bytes())?;
        stdout.flush()
    }
}

/// In-memory channel. A second `output_string` call is rejected so callers can
/// rely on seeing exactly the one envelope the engine produced.
#[derive(Debug, Default)]
pub struct BufferChannel {
    input: Option<String>,
    output: Option<String>,
}

impl BufferChannel {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: Some(input.into()),
            output: None,
        }
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn into_output(self) -> Option<String> {
        self.output
    }
}

impl InvocationChannel for BufferChannel {
    fn input_string(&mut self) -> std::io::Result<String> {
        self.input.take().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "invocation input was already consumed",
            )
        })
    }

    fn output_string(&mut self, output: &str) -> std::io::Result<()> {
        if self.output.is_some() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "invocation output was already written",
            ));
        }
        self.output = Some(output.to_string());
        Ok(())
    }
}
