fn main() {
    // Rebuild the lexer when the token grammar changes
    println!("cargo:rerun-if-changed=src/lexer.pest");
}
