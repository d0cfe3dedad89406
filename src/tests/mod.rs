
mod classpath;
